// self
use crate::obs::{CallOutcome, Stage};

/// Records a stage outcome via the global metrics recorder (when enabled).
pub fn record_call_outcome(stage: Stage, outcome: CallOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"bearer_broker_call_total",
			"stage" => stage.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (stage, outcome);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn record_call_outcome_noop_without_metrics() {
		record_call_outcome(Stage::Replay, CallOutcome::Failure);
	}
}
