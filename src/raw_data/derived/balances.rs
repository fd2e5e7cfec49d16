use crate::raw_data::decoding::{CanonicalValue, FieldSelector};
use crate::raw_data::historical::eth_calls::CallOutcome;

/// Keep successful outcomes holding at least one position with a non-zero
/// quantity at `selector`. The result may be a list of tuples or a single
/// tuple.
pub fn filter_nonzero_balances(
    outcomes: &[CallOutcome],
    selector: FieldSelector,
) -> Vec<CallOutcome> {
    let kept: Vec<CallOutcome> = outcomes
        .iter()
        .filter(|outcome| outcome.is_success())
        .filter(|outcome| {
            outcome
                .result
                .as_ref()
                .is_some_and(|result| has_nonzero_position(result, selector))
        })
        .cloned()
        .collect();

    tracing::info!(
        "{} of {} call outcomes hold a non-zero balance",
        kept.len(),
        outcomes.len()
    );
    kept
}

fn has_nonzero_position(result: &CanonicalValue, selector: FieldSelector) -> bool {
    let Some(items) = result.as_list() else {
        return false;
    };

    let is_list_of_tuples = !items.is_empty() && items.iter().all(|i| i.as_list().is_some());
    if is_list_of_tuples {
        items
            .iter()
            .any(|tuple| selector.select(tuple).is_some_and(CanonicalValue::is_nonzero_quantity))
    } else {
        selector
            .select(result)
            .is_some_and(CanonicalValue::is_nonzero_quantity)
    }
}
