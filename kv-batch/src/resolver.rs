use crate::{ClientConfig, Entity, Error, Identity, Key};

/// What a batch is about to do with its keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Intent {
    /// Incomplete keys are allowed and get generated ids.
    Put,
    /// Every key must be complete.
    Read,
}

pub(crate) fn kind_of<E: Entity>(config: &ClientConfig) -> Result<String, Error> {
    let kind = (config.kind_resolver)(E::meta());
    if kind.is_empty() {
        return Err(Error::InvalidShape(format!(
            "no kind resolved for {}",
            E::meta().type_path
        )));
    }
    Ok(kind)
}

/// Derives the key of `entity`, and whether its identity is an explicit string.
pub(crate) fn resolve<E: Entity>(config: &ClientConfig, entity: &E) -> Result<(Key, bool), Error> {
    let kind = kind_of::<E>(config)?;
    let (key, has_string_id) = match entity.identity() {
        Identity::Absent => (Key::incomplete(kind), false),
        Identity::Name(name) => (Key::named(kind, name), true),
        Identity::Id(id) => (Key::numeric(kind, id), false),
    };
    Ok((key.with_parent(entity.parent()), has_string_id))
}

pub(crate) fn resolve_all<E: Entity>(
    config: &ClientConfig,
    entities: &[E],
    intent: Intent,
) -> Result<Vec<Key>, Error> {
    entities
        .iter()
        .enumerate()
        .map(|(index, entity)| {
            let (key, has_string_id) = resolve(config, entity)?;
            if key.is_complete() {
                return Ok(key);
            }
            match intent {
                Intent::Read => Err(Error::MissingIdentity {
                    index,
                    kind: key.kind,
                }),
                Intent::Put if has_string_id => Err(Error::EmptyStringIdentity {
                    index,
                    kind: key.kind,
                }),
                Intent::Put => Ok(key),
            }
        })
        .collect()
}

/// Writes the identity and parent of `key` into `entity`.
pub(crate) fn apply<E: Entity>(entity: &mut E, key: &Key) -> Result<(), Error> {
    entity.set_identity(key)?;
    entity.set_parent(key.parent_key().cloned());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(crate::Entity, Clone, PartialEq, ::prost::Message)]
    struct Account {
        #[entity(id)]
        #[prost(string, tag = "1")]
        handle: String,
    }

    #[derive(crate::Entity, Clone, PartialEq, ::prost::Message)]
    struct Comment {
        #[entity(id)]
        #[prost(int64, tag = "1")]
        id: i64,
        #[entity(parent)]
        #[prost(message, optional, tag = "2")]
        parent: Option<Key>,
    }

    #[derive(crate::Entity, Clone, PartialEq, ::prost::Message)]
    struct Event {
        #[prost(string, tag = "1")]
        body: String,
    }

    #[test]
    fn string_identity_is_explicit() {
        let config = ClientConfig::default();
        let (key, explicit) = resolve(&config, &Account { handle: "amy".into() }).unwrap();
        assert_eq!(key, Key::named("Account", "amy"));
        assert!(explicit);
    }

    #[test]
    fn empty_string_identity_fails_on_put_only_when_explicit() {
        let config = ClientConfig::default();
        let err = resolve_all(&config, &[Account::default()], Intent::Put).unwrap_err();
        assert_eq!(
            err,
            Error::EmptyStringIdentity {
                index: 0,
                kind: "Account".into()
            }
        );
        let keys = resolve_all(&config, &[Comment::default(), Comment::default()], Intent::Put)
            .unwrap();
        assert!(keys.iter().all(|k| !k.is_complete()));
        assert!(resolve_all(&config, &[Event::default()], Intent::Put).is_ok());
    }

    #[test]
    fn reads_need_complete_keys() {
        let config = ClientConfig::default();
        let comments = [
            Comment {
                id: 4,
                parent: None,
            },
            Comment::default(),
        ];
        let err = resolve_all(&config, &comments, Intent::Read).unwrap_err();
        assert_eq!(
            err,
            Error::MissingIdentity {
                index: 1,
                kind: "Comment".into()
            }
        );
    }

    #[test]
    fn apply_stamps_identity_and_parent() {
        let parent = Key::named("Account", "amy");
        let key = Key::numeric("Comment", 9).with_parent(Some(parent.clone()));
        let mut comment = Comment::default();
        apply(&mut comment, &key).unwrap();
        assert_eq!(comment.id, 9);
        assert_eq!(comment.parent, Some(parent));

        let mut account = Account::default();
        assert!(matches!(
            apply(&mut account, &Key::numeric("Account", 3)),
            Err(Error::InvalidShape(_))
        ));
    }

    #[test]
    fn custom_kind_resolver() {
        fn lowercase(meta: &crate::EntityMeta) -> String {
            meta.type_name.to_lowercase()
        }
        fn blank(_: &crate::EntityMeta) -> String {
            String::new()
        }
        let config = ClientConfig::default().with_kind_resolver(lowercase);
        assert_eq!(kind_of::<Account>(&config).unwrap(), "account");
        let config = ClientConfig::default().with_kind_resolver(blank);
        assert!(matches!(
            resolve(&config, &Account::default()),
            Err(Error::InvalidShape(_))
        ));
    }
}
