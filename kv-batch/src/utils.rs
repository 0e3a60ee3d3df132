use crate::Key;

const DATA_ROOT: &str = "entity/data";
const INDEX_ROOT: &str = "entity/index";
const SEQUENCE_ROOT: &str = "entity/sequence";

/// Ends the value segment of an index path. It sorts below every byte an
/// encoded value can contain, so a value sorts before all of its extensions.
pub(crate) const VALUE_END: char = '\0';

/// Smallest key strictly greater than every key starting with `prefix`.
pub(crate) fn next_key(prefix: &[u8]) -> Vec<u8> {
    let mut next_key = prefix.to_vec();
    for i in (0..next_key.len()).rev() {
        if next_key[i] < 0xff {
            next_key[i] += 1;
            next_key.truncate(i + 1);
            return next_key;
        }
    }
    next_key.push(0);
    next_key
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\0' => out.push_str("%00"),
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            ':' => out.push_str("%3A"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3)?;
        out.push(match code {
            "00" => '\0',
            "25" => '%',
            "2F" => '/',
            "3A" => ':',
            _ => return None,
        });
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}

// Order preserving: `\0` and `\x01` move behind an `\x01` escape, leaving `\0` free for VALUE_END.
fn escape_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\0' => out.push_str("\x01\x01"),
            '\x01' => out.push_str("\x01\x02"),
            c => out.push(c),
        }
    }
    out
}

// Offset so that negative ids sort before positive ones.
fn encode_numeric_id(id: i64) -> String {
    format!("{:020}", (id as u64) ^ (1u64 << 63))
}

fn decode_numeric_id(raw: &str) -> Option<i64> {
    raw.parse::<u64>().ok().map(|v| (v ^ (1u64 << 63)) as i64)
}

/// Ordered, reversible text form of a key and its ancestors.
pub(crate) fn encode_key_path(key: &Key) -> String {
    let mut segments = Vec::new();
    let mut cursor = Some(key);
    while let Some(k) = cursor {
        let id = if !k.name.is_empty() {
            format!("s{}", escape(&k.name))
        } else {
            format!("n{}", encode_numeric_id(k.id))
        };
        segments.push(format!("{}:{}", escape(&k.kind), id));
        cursor = k.parent_key();
    }
    segments.reverse();
    segments.join("/")
}

pub(crate) fn decode_key_path(path: &str) -> Option<Key> {
    let mut key: Option<Key> = None;
    for segment in path.split('/') {
        let (kind, id) = segment.split_once(':')?;
        let mut next = Key::incomplete(unescape(kind)?);
        match id.split_at_checked(1)? {
            ("s", name) => next.name = unescape(name)?,
            ("n", id) => next.id = decode_numeric_id(id)?,
            _ => return None,
        }
        next.parent = key.map(Box::new);
        key = Some(next);
    }
    key
}

pub(crate) fn kind_data_prefix(kind: &str) -> String {
    format!("{}/{}/", DATA_ROOT, escape(kind))
}

pub(crate) fn data_path(key: &Key) -> String {
    format!("{}{}", kind_data_prefix(&key.kind), encode_key_path(key))
}

pub(crate) fn index_field_prefix(kind: &str, field_name: &str) -> String {
    format!("{}/{}/{}/", INDEX_ROOT, escape(kind), escape(field_name))
}

pub(crate) fn index_value_prefix(kind: &str, field_name: &str, value: &str) -> String {
    format!(
        "{}{}{}",
        index_field_prefix(kind, field_name),
        escape_value(value),
        VALUE_END
    )
}

pub(crate) fn index_path(kind: &str, field_name: &str, value: &str, key: &Key) -> String {
    format!(
        "{}{}",
        index_value_prefix(kind, field_name, value),
        encode_key_path(key)
    )
}

pub(crate) fn sequence_path(kind: &str) -> String {
    format!("{}/{}", SEQUENCE_ROOT, escape(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_path_round_trips_awkward_names() {
        let key = Key::named("Post", "a/b:c%d\0e")
            .with_parent(Some(Key::numeric("User", -42)));
        let path = encode_key_path(&key);
        assert!(!path.contains("a/b"));
        assert_eq!(decode_key_path(&path), Some(key));
    }

    #[test]
    fn numeric_ids_sort_numerically() {
        let ids = [-5_i64, -1, 1, 9, 10, 1_000_000];
        let paths: Vec<_> = ids
            .iter()
            .map(|id| data_path(&Key::numeric("User", *id)))
            .collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }

    #[test]
    fn next_key_bounds_prefix() {
        let prefix = kind_data_prefix("User");
        let end = next_key(prefix.as_bytes());
        let inside = data_path(&Key::named("User", "zzz"));
        assert!(inside.as_bytes() < end.as_slice());
        assert!(prefix.as_bytes() < end.as_slice());
        assert_eq!(next_key(&[0x01, 0xff]), vec![0x02]);
    }

    #[test]
    fn index_values_sort_before_their_extensions() {
        let key = Key::named("User", "amy");
        let mut paths: Vec<String> = ["Oslo Nord", "Oslo", "Lima-Sur", "Lima", "Osl\0o", "Oslo\x01"]
            .iter()
            .map(|value| index_path("User", "city", value, &key))
            .collect();
        paths.sort();
        let values: Vec<&str> = paths
            .iter()
            .map(|p| {
                let rest = p.strip_prefix(index_field_prefix("User", "city").as_str()).unwrap();
                rest.split_once(VALUE_END).unwrap().0
            })
            .collect();
        assert_eq!(
            values,
            ["Lima", "Lima-Sur", "Osl\x01\x01o", "Oslo", "Oslo\x01\x02", "Oslo Nord"]
        );
    }

    #[test]
    fn malformed_paths_are_rejected() {
        assert_eq!(decode_key_path("User"), None);
        assert_eq!(decode_key_path("User:x1"), None);
        assert_eq!(decode_key_path("User:s%zz"), None);
    }
}
