use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Field, Fields, LitStr, Type, parse_macro_input, spanned::Spanned};

#[proc_macro_derive(Entity, attributes(entity, index))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct FieldRoles<'a> {
    id: Option<&'a Field>,
    parent: Option<&'a Field>,
    indexed: Vec<&'a Field>,
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let struct_name = &input.ident;

    let fields = match &input.data {
        Data::Struct(data_struct) => match &data_struct.fields {
            Fields::Named(fields) => fields.named.iter().collect::<Vec<_>>(),
            Fields::Unit => Vec::new(),
            Fields::Unnamed(_) => {
                return Err(syn::Error::new(
                    input.span(),
                    "Entity can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "Entity can only be derived for structs",
            ));
        }
    };

    let kind = struct_kind(input)?;
    let roles = field_roles(&fields)?;

    let identity_impl = identity_impl(roles.id)?;
    let parent_impl = match roles.parent {
        Some(field) => {
            let name = &field.ident;
            quote! {
                fn parent(&self) -> Option<::kv_batch::Key> {
                    self.#name.clone()
                }

                fn set_parent(&mut self, parent: Option<::kv_batch::Key>) {
                    self.#name = parent;
                }
            }
        }
        None => quote! {
            fn parent(&self) -> Option<::kv_batch::Key> {
                None
            }

            fn set_parent(&mut self, _parent: Option<::kv_batch::Key>) {}
        },
    };

    let mut encode_functions = Vec::new();
    let mut field_encodings = Vec::new();
    for field in &roles.indexed {
        let Some(field_name) = field.ident.as_ref() else {
            continue;
        };
        let field_type = &field.ty;
        let field_name_str = field_name.to_string();
        let encode_fn_name = format_ident!("encode_{}", field_name);

        if is_string_type(field_type) {
            encode_functions.push(quote! {
                pub fn #encode_fn_name(value: impl Into<String>) -> String {
                    value.into()
                }
            });
            field_encodings.push(quote! {
                result.push((#field_name_str.to_string(), #struct_name::#encode_fn_name(self.#field_name.clone())));
            });
        } else if matches_numeric_type(field_type) {
            let encoding_logic = generate_numeric_encoding(&quote!(#field_type).to_string());
            encode_functions.push(quote! {
                pub fn #encode_fn_name(value: #field_type) -> String {
                    #encoding_logic
                }
            });
            field_encodings.push(quote! {
                result.push((#field_name_str.to_string(), #struct_name::#encode_fn_name(self.#field_name)));
            });
        } else {
            return Err(syn::Error::new(
                field_type.span(),
                format!(
                    "Field '{}' has type '{}' which is not supported for indexing. Only String and numeric types are supported.",
                    field_name,
                    quote!(#field_type)
                ),
            ));
        }
    }

    let indexed_field_names: Vec<String> = roles
        .indexed
        .iter()
        .filter_map(|field| field.ident.as_ref().map(|ident| ident.to_string()))
        .collect();

    let kind_tokens = match &kind {
        Some(kind) => quote! { Some(#kind) },
        None => quote! { None },
    };
    let meta = quote! {
        ::kv_batch::EntityMeta {
            type_name: stringify!(#struct_name),
            type_path: concat!(module_path!(), "::", stringify!(#struct_name)),
            kind: #kind_tokens,
            indexed_field_names: || vec![#(#indexed_field_names),*],
        }
    };

    Ok(quote! {
        impl ::kv_batch::Entity for #struct_name {
            fn meta() -> &'static ::kv_batch::EntityMeta {
                static META: ::kv_batch::EntityMeta = #meta;
                &META
            }

            #identity_impl

            #parent_impl

            fn indexed_fields(&self) -> Vec<(String, String)> {
                #[allow(unused_mut)]
                let mut result = Vec::new();
                #(#field_encodings)*
                result
            }
        }

        impl #struct_name {
            #(#encode_functions)*
        }

        ::kv_batch::inventory::submit! {
            #meta
        }
    })
}

fn struct_kind(input: &DeriveInput) -> syn::Result<Option<String>> {
    let mut kind = None;
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("entity")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("kind") {
                let value: LitStr = meta.value()?.parse()?;
                if value.value().is_empty() {
                    return Err(meta.error("kind must not be empty"));
                }
                kind = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unsupported entity attribute, expected `kind = \"...\"`"))
            }
        })?;
    }
    Ok(kind)
}

fn field_roles<'a>(fields: &[&'a Field]) -> syn::Result<FieldRoles<'a>> {
    let mut roles = FieldRoles::default();
    for field in fields {
        if field.attrs.iter().any(|attr| attr.path().is_ident("index")) {
            roles.indexed.push(field);
        }
        for attr in field.attrs.iter().filter(|a| a.path().is_ident("entity")) {
            attr.parse_nested_meta(|meta| {
                let slot = if meta.path.is_ident("id") {
                    &mut roles.id
                } else if meta.path.is_ident("parent") {
                    &mut roles.parent
                } else {
                    return Err(meta.error("unsupported field attribute, expected `id` or `parent`"));
                };
                if slot.is_some() {
                    return Err(meta.error("only one field may carry this attribute"));
                }
                *slot = Some(*field);
                Ok(())
            })?;
        }
    }
    Ok(roles)
}

fn identity_impl(id: Option<&Field>) -> syn::Result<proc_macro2::TokenStream> {
    let Some(field) = id else {
        return Ok(quote! {
            fn identity(&self) -> ::kv_batch::Identity {
                ::kv_batch::Identity::Absent
            }

            fn set_identity(&mut self, _key: &::kv_batch::Key) -> Result<(), ::kv_batch::Error> {
                Ok(())
            }
        });
    };
    let name = &field.ident;
    let field_type = &field.ty;
    let name_str = name.as_ref().map(|n| n.to_string()).unwrap_or_default();

    if is_string_type(field_type) {
        Ok(quote! {
            fn identity(&self) -> ::kv_batch::Identity {
                ::kv_batch::Identity::Name(self.#name.clone())
            }

            fn set_identity(&mut self, key: &::kv_batch::Key) -> Result<(), ::kv_batch::Error> {
                if key.id != 0 {
                    return Err(::kv_batch::Error::InvalidShape(format!(
                        "numeric key {} cannot be stored in string field {}",
                        key, #name_str
                    )));
                }
                self.#name = key.name.clone();
                Ok(())
            }
        })
    } else if matches_integer_type(field_type) {
        Ok(quote! {
            fn identity(&self) -> ::kv_batch::Identity {
                if self.#name == 0 {
                    ::kv_batch::Identity::Absent
                } else {
                    ::kv_batch::Identity::Id(self.#name as i64)
                }
            }

            fn set_identity(&mut self, key: &::kv_batch::Key) -> Result<(), ::kv_batch::Error> {
                if !key.name.is_empty() {
                    return Err(::kv_batch::Error::InvalidShape(format!(
                        "named key {} cannot be stored in integer field {}",
                        key, #name_str
                    )));
                }
                self.#name = key.id as #field_type;
                Ok(())
            }
        })
    } else {
        Err(syn::Error::new(
            field_type.span(),
            "the id field must be a String or an integer",
        ))
    }
}

// Sortable fixed-width encoding for a numeric index value.
fn generate_numeric_encoding(type_str: &str) -> proc_macro2::TokenStream {
    match type_str {
        // Unsigned: zero padded.
        "u8" => quote! { format!("{:03}", value) },
        "u16" => quote! { format!("{:05}", value) },
        "u32" => quote! { format!("{:010}", value) },
        "u64" | "usize" => quote! { format!("{:020}", value) },

        // Signed: offset before padding so negatives sort first.
        "i8" => quote! { format!("{:03}", (value as i16 + 128) as u16) },
        "i16" => quote! { format!("{:05}", (value as i32 + 32768) as u32) },
        "i32" => quote! { format!("{:010}", (value as i64 + 2147483648) as u64) },
        "i64" | "isize" => quote! {
            format!("{:020}", (value as i64 as u64) ^ (1u64 << 63))
        },

        // Floats: bit patterns flipped into sortable order.
        "f32" => quote! {
            let bits = value.to_bits();
            let sortable_bits = if value.is_sign_negative() { !bits } else { bits ^ (1u32 << 31) };
            format!("{:010}", sortable_bits)
        },
        "f64" => quote! {
            let bits = value.to_bits();
            let sortable_bits = if value.is_sign_negative() { !bits } else { bits ^ (1u64 << 63) };
            format!("{:020}", sortable_bits)
        },

        _ => quote! { format!("{:020}", value) },
    }
}

fn is_string_type(ty: &Type) -> bool {
    let type_str = quote!(#ty).to_string().replace(' ', "");
    matches!(
        type_str.as_str(),
        "String" | "std::string::String" | "::prost::alloc::string::String" | "prost::alloc::string::String"
    )
}

fn matches_integer_type(ty: &Type) -> bool {
    let type_str = quote!(#ty).to_string();
    matches!(
        type_str.as_str(),
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize"
    )
}

fn matches_numeric_type(ty: &Type) -> bool {
    let type_str = quote!(#ty).to_string();
    matches_integer_type(ty) || matches!(type_str.as_str(), "f32" | "f64")
}
