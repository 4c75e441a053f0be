//! Fixtures shared by the end-to-end tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use trigger_core::platform::sample_trigger;
use trigger_core::{FlowConfig, FlowConfigId, InMemoryPlatform, RetryPolicy, TableDetail};

pub const ORDERS_TABLE: &str = "in.c-shop.orders";

pub fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
    }
}

/// Flow storing a trigger definition that selects [`ORDERS_TABLE`].
pub fn flow(id: &str) -> FlowConfig {
    FlowConfig {
        id: FlowConfigId::parse(id).unwrap(),
        name: format!("Flow {id}"),
        is_disabled: false,
        configuration: json!({
            "phases": [],
            "tasks": [],
            "trigger": {
                "runWithTokenId": 3,
                "coolDownPeriodMinutes": 15,
                "tableIds": [ORDERS_TABLE]
            }
        }),
    }
}

/// Project with the given flows; `true` seeds the flow with a trigger.
pub fn project(flows: &[(&str, bool)]) -> Arc<InMemoryPlatform> {
    let platform = Arc::new(InMemoryPlatform::new());
    platform.insert_table(TableDetail {
        id: ORDERS_TABLE.to_string(),
        last_import_date: Some("2024-05-01T08:00:00+0200".to_string()),
    });
    for (id, with_trigger) in flows {
        let config = flow(id);
        if *with_trigger {
            platform.insert_trigger(sample_trigger(
                &format!("old-{id}"),
                &config.id,
                &[ORDERS_TABLE],
            ));
        }
        platform.insert_flow(config);
    }
    platform
}
