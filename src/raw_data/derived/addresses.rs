use std::collections::BTreeSet;

use crate::raw_data::decoding::{FieldSelector, LogRecord};

/// Unique identifiers pulled out of an event stream, kept sorted so the
/// derived call batch is the same regardless of window completion order.
pub type DerivedAddressSet = BTreeSet<String>;

/// Collect the selected argument of every record whose event name satisfies
/// `predicate`. Unrecognized records, and records whose selected argument is
/// missing or not a scalar, are skipped.
pub fn extract_addresses<P>(
    records: &[LogRecord],
    predicate: P,
    selector: FieldSelector,
) -> DerivedAddressSet
where
    P: Fn(&str) -> bool,
{
    let mut skipped = 0usize;
    let mut set = DerivedAddressSet::new();

    for record in records {
        let Some(event) = record.event.as_deref() else {
            continue;
        };
        if !predicate(event) {
            continue;
        }
        match selector.select(record.args.as_slice()).and_then(|v| v.as_text()) {
            Some(address) => {
                set.insert(address.to_string());
            }
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::warn!(
            "Skipped {} matching records without a scalar at position {}",
            skipped,
            selector.position()
        );
    }
    tracing::debug!(
        "Derived {} unique addresses from {} records",
        set.len(),
        records.len()
    );

    set
}
