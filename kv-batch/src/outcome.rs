use crate::{
    BatchError, Entity, Error, Key, MultiError, Record, ServiceError, record::decode_payload,
    resolver::apply,
};

/// Per-element outcomes of one batch call, `None` meaning success.
pub(crate) type Outcomes = Vec<Option<ServiceError>>;

/// Reduces per-element outcomes to a single result.
///
/// When every slot holds the same outcome it is reported once, unless it is a kind
/// the store always itemizes (not-found, field mismatch, invalid entity type): those
/// keep the full array so callers can inspect individual slots. Mixed outcomes are
/// always returned itemized.
pub fn collapse(outcomes: Vec<Option<ServiceError>>) -> Result<(), Error> {
    let Some(first) = outcomes.first() else {
        return Ok(());
    };
    if outcomes.iter().all(|o| o == first) {
        return match first {
            None => Ok(()),
            Some(err) if err.is_always_itemized() => Err(Error::Multi(MultiError(outcomes))),
            Some(err) => Err(Error::Service(err.clone())),
        };
    }
    Err(Error::Multi(MultiError(outcomes)))
}

/// Drops field mismatches when schema drift is tolerated.
pub(crate) fn filter_mismatch(
    outcome: Option<ServiceError>,
    ignore_field_mismatch: bool,
) -> Option<ServiceError> {
    match outcome {
        Some(err) if ignore_field_mismatch && err.is_field_mismatch() => None,
        other => other,
    }
}

/// Reduces the error of a one-element batch to that element's error.
pub(crate) fn first_item(err: Error) -> Error {
    match err {
        Error::Multi(multi) => match multi.get(0) {
            Some(item) => Error::Service(item.clone()),
            None => Error::Multi(multi),
        },
        other => other,
    }
}

/// Records generated keys in `keys` and returns the put outcomes.
pub(crate) fn assign_keys(results: Vec<Result<Key, ServiceError>>, keys: &mut [Key]) -> Outcomes {
    results
        .into_iter()
        .zip(keys.iter_mut())
        .map(|(result, key)| match result {
            Ok(assigned) => {
                *key = assigned;
                None
            }
            Err(err) => Some(err),
        })
        .collect()
}

/// Writes completed keys back into `entities` and collapses the put outcomes.
///
/// The keys are returned with the error too, so ids generated for the accepted
/// elements are never lost.
pub(crate) fn finish_put<E: Entity>(
    entities: &mut [E],
    keys: Vec<Key>,
    outcomes: Outcomes,
) -> Result<Vec<Key>, BatchError> {
    let applied = entities
        .iter_mut()
        .zip(&keys)
        .filter(|(_, key)| key.is_complete())
        .try_for_each(|(entity, key)| apply(entity, key));
    match applied.and_then(|()| collapse(outcomes)) {
        Ok(()) => Ok(keys),
        Err(source) => Err(BatchError { keys, source }),
    }
}

/// Decodes fetched records into `dst` and returns the filtered get outcomes.
pub(crate) fn load_all<E: Entity>(
    results: Vec<Result<Record, ServiceError>>,
    keys: &[Key],
    dst: &mut [E],
    ignore_field_mismatch: bool,
) -> Outcomes {
    results
        .into_iter()
        .zip(keys)
        .zip(dst.iter_mut())
        .map(|((result, key), entity)| {
            let outcome = match result {
                Ok(record) => match decode_payload(&key.kind, &record.payload, entity) {
                    Err(err) if !err.is_field_mismatch() => return Some(err),
                    decoded => decoded.err(),
                },
                Err(err) => return Some(err),
            };
            if let Err(err) = apply(entity, key) {
                return Some(ServiceError::InvalidEntityType(err.to_string()));
            }
            filter_mismatch(outcome, ignore_field_mismatch)
        })
        .collect()
}

pub(crate) fn item_errors(results: Vec<Result<(), ServiceError>>) -> Outcomes {
    results.into_iter().map(Result::err).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_not_found;

    fn mismatch() -> ServiceError {
        ServiceError::FieldMismatch {
            kind: "User".into(),
            reason: "extra".into(),
        }
    }

    #[test]
    fn empty_and_all_success_collapse_to_ok() {
        assert_eq!(collapse(vec![]), Ok(()));
        assert_eq!(collapse(vec![None, None, None]), Ok(()));
    }

    #[test]
    fn uniform_scalar_kind_collapses() {
        let err = ServiceError::InvalidKey("empty kind".into());
        let result = collapse(vec![Some(err.clone()), Some(err.clone()), Some(err.clone())]);
        assert_eq!(result, Err(Error::Service(err)));
    }

    #[test]
    fn uniform_not_found_stays_itemized() {
        let result = collapse(vec![
            Some(ServiceError::NoSuchEntity),
            Some(ServiceError::NoSuchEntity),
        ]);
        let err = result.unwrap_err();
        assert!(matches!(&err, Error::Multi(m) if m.len() == 2));
        assert!(is_not_found(&err, 0));
        assert!(is_not_found(&err, 1));
    }

    #[test]
    fn uniform_mismatch_stays_itemized() {
        let result = collapse(vec![Some(mismatch()), Some(mismatch())]);
        assert!(matches!(result, Err(Error::Multi(_))));
    }

    #[test]
    fn mixed_outcomes_keep_positions() {
        let err1 = ServiceError::InvalidKey("a".into());
        let err2 = ServiceError::Backend("b".into());
        let Err(Error::Multi(multi)) =
            collapse(vec![None, Some(err1.clone()), Some(err2.clone())])
        else {
            panic!("expected itemized error");
        };
        assert_eq!(multi[0], None);
        assert_eq!(multi[1], Some(err1));
        assert_eq!(multi[2], Some(err2));
    }

    #[test]
    fn same_kind_different_payload_is_mixed() {
        let result = collapse(vec![
            Some(ServiceError::Backend("a".into())),
            Some(ServiceError::Backend("b".into())),
        ]);
        assert!(matches!(result, Err(Error::Multi(_))));
    }

    #[test]
    fn mismatch_filter_only_drops_mismatches() {
        assert_eq!(filter_mismatch(Some(mismatch()), true), None);
        assert_eq!(filter_mismatch(Some(mismatch()), false), Some(mismatch()));
        assert_eq!(
            filter_mismatch(Some(ServiceError::NoSuchEntity), true),
            Some(ServiceError::NoSuchEntity)
        );
    }

    #[test]
    fn first_item_unwraps_itemized_errors() {
        let multi = Error::Multi(MultiError(vec![Some(ServiceError::NoSuchEntity)]));
        assert_eq!(first_item(multi), Error::Service(ServiceError::NoSuchEntity));
        assert_eq!(first_item(Error::Done), Error::Done);
    }

    #[test]
    fn assigned_keys_replace_incomplete_ones() {
        let mut keys = vec![Key::incomplete("User"), Key::incomplete("User")];
        let outcomes = assign_keys(
            vec![Ok(Key::numeric("User", 5)), Err(ServiceError::NoSuchEntity)],
            &mut keys,
        );
        assert_eq!(outcomes, vec![None, Some(ServiceError::NoSuchEntity)]);
        assert_eq!(keys[0], Key::numeric("User", 5));
        assert!(!keys[1].is_complete());
    }
}
