use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sdk::{Fields, OperationRequest, ReconcileError, RequestSender, ResponseEnvelope, Verb};
use trellis_engine::planner::normalize::canonical_mac;
use trellis_engine::planner::{IdentityFields, KindPaths, Planner, TableKind};
use trellis_engine::results::{Results, SEQUENCE_NUMBER};
use trellis_engine::transport::{classify, Coordinator, TransportSettings};

/// Sender whose every write is rejected
struct RejectingSender {
    calls: AtomicUsize,
}

#[async_trait]
impl RequestSender for RejectingSender {
    fn name(&self) -> &str {
        "rejecting"
    }

    async fn send(&self, _request: &OperationRequest) -> Result<ResponseEnvelope, ReconcileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResponseEnvelope::new(500, "Internal Server Error", json!({})).with_error(json!("no")))
    }
}

// Registering N tasks yields sequence numbers 1..N on every list
proptest! {
    #[test]
    fn test_sequence_numbers_strictly_increase(n in 1usize..40, changed in any::<bool>()) {
        let mut results = Results::new();
        for i in 0..n {
            results.record_result(json!({"success": true, "changed": changed}).as_object().cloned().unwrap());
            let sequence = results.register_task_result();
            prop_assert_eq!(sequence, i as u64 + 1);
        }

        let report = results.build_final_result();
        prop_assert_eq!(report.diff.len(), n);
        prop_assert_eq!(report.response.len(), n);
        prop_assert_eq!(report.result.len(), n);
        prop_assert_eq!(report.metadata.len(), n);
        for (i, metadata) in report.metadata.iter().enumerate() {
            prop_assert_eq!(&metadata[SEQUENCE_NUMBER], &json!(i as u64 + 1));
        }
        prop_assert_eq!(report.changed, changed);
        prop_assert!(!report.failed);
    }
}

// Writes carrying an error indicator fail whatever the message says
proptest! {
    #[test]
    fn test_error_indicator_always_fails_writes(
        code in 0i64..600,
        message in "OK|Created|[A-Za-z ]{0,12}",
        verb in prop_oneof![Just(Verb::Post), Just(Verb::Put), Just(Verb::Delete)],
    ) {
        let response = ResponseEnvelope::new(code, message, json!({})).with_error(json!("failure"));
        let result = classify(verb, &response);
        prop_assert!(!result.success);
        prop_assert_eq!(result.changed, Some(false));
    }
}

// A failing operation is attempted ceil(timeout / interval) times
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]
    #[test]
    fn test_retry_attempts_match_budget(interval in 1u64..10, timeout in 1u64..60) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let sender = Arc::new(RejectingSender { calls: AtomicUsize::new(0) });
        let settings = TransportSettings::new(interval, timeout).unwrap().with_fast_test(true);
        let mut coordinator = Coordinator::with_sender(sender.clone(), settings);
        coordinator.configure(OperationRequest::put("/fabrics/F1"));

        let result = runtime.block_on(coordinator.commit()).unwrap();

        let expected = timeout.div_ceil(interval) as usize;
        prop_assert!(!result.success);
        prop_assert_eq!(sender.calls.load(Ordering::SeqCst), expected);
        let budgets = coordinator.last_attempt_budgets();
        prop_assert_eq!(budgets.len(), expected);
        prop_assert_eq!(budgets[0], timeout);
        prop_assert!(budgets.windows(2).all(|w| w[0] - w[1] == interval));
    }
}

// Every accepted MAC spelling of one address canonicalizes identically
proptest! {
    #[test]
    fn test_mac_spellings_agree(bytes in prop::array::uniform6(any::<u8>()), upper in any::<bool>()) {
        let hex: Vec<String> = bytes
            .iter()
            .map(|b| if upper { format!("{:02X}", b) } else { format!("{:02x}", b) })
            .collect();

        let colon = hex.join(":");
        let dash = hex.join("-");
        let bare = hex.concat();
        let dotted = format!("{}.{}.{}", &bare[0..4], &bare[4..8], &bare[8..12]);

        let canonical = canonical_mac(&colon);
        prop_assert!(canonical.is_some());
        prop_assert_eq!(&canonical, &canonical_mac(&dash));
        prop_assert_eq!(&canonical, &canonical_mac(&dotted));
        prop_assert_eq!(&canonical, &canonical_mac(&bare));
        prop_assert_eq!(canonical.unwrap(), dotted.to_ascii_lowercase());
    }
}

// Current values reported as strings never differ from the native values they encode
proptest! {
    #[test]
    fn test_stringly_current_matches_native_desired(
        values in prop::collection::btree_map("[A-Z]{2,8}", prop_oneof![
            any::<i32>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-z]{1,8}".prop_map(Value::from),
        ], 1..8),
    ) {
        let kind = TableKind::new(
            "fabric",
            IdentityFields::new("NAME_", "TYPE_", "DEPLOY_"),
            KindPaths::default(),
        );
        let planner = Planner::new(&kind);

        let mut desired = Fields::new();
        let mut current = Fields::new();
        desired.insert("NAME_".to_string(), json!("F1"));
        for (field, value) in values {
            let text = match &value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            current.insert(field.clone(), Value::from(text));
            desired.insert(field, value);
        }

        let change_set = planner.plan_merge(&desired, &current).unwrap();
        prop_assert!(!change_set.update_required);
        prop_assert_eq!(change_set.payload, desired);
    }
}
