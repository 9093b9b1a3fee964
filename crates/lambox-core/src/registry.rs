use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::arn;
use crate::types::FunctionRecord;

/// Lookup table of deployed functions.
///
/// Records are shared as `Arc`s: every lookup of the same registration
/// returns the same record.
pub trait FunctionRegistry: Send + Sync {
    /// Store a record under its name. A later registration of the same name
    /// replaces the earlier one.
    fn register(&self, record: FunctionRecord) -> Arc<FunctionRecord>;

    fn get_by_name(&self, name: &str) -> Option<Arc<FunctionRecord>>;

    /// Resolve a full function ARN in this registry's region.
    fn get_by_arn(&self, arn: &str) -> Option<Arc<FunctionRecord>>;

    /// All records, ordered by function name.
    fn list(&self) -> Vec<Arc<FunctionRecord>>;

    fn container_ids(&self) -> Vec<String>;
}

pub struct InMemoryRegistry {
    region: String,
    functions: RwLock<HashMap<String, Arc<FunctionRecord>>>,
}

impl InMemoryRegistry {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            functions: RwLock::new(HashMap::new()),
        }
    }
}

impl FunctionRegistry for InMemoryRegistry {
    fn register(&self, record: FunctionRecord) -> Arc<FunctionRecord> {
        let record = Arc::new(record);
        let previous = self
            .functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.function_name.clone(), Arc::clone(&record));
        if let Some(previous) = previous {
            tracing::warn!(
                function = %record.function_name,
                replaced_container = %previous.container.id,
                "Replaced existing registration"
            );
        }
        record
    }

    fn get_by_name(&self, name: &str) -> Option<Arc<FunctionRecord>> {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn get_by_arn(&self, arn: &str) -> Option<Arc<FunctionRecord>> {
        let name = arn::parse_function_arn(arn, &self.region)?;
        self.get_by_name(name)
    }

    fn list(&self) -> Vec<Arc<FunctionRecord>> {
        let mut records: Vec<_> = self
            .functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| a.function_name.cmp(&b.function_name));
        records
    }

    fn container_ids(&self) -> Vec<String> {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|r| r.container.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use lambox_docker::ContainerInspect;

    use super::*;
    use crate::types::LATEST_VERSION;

    fn record(name: &str, container_id: &str) -> FunctionRecord {
        FunctionRecord {
            function_name: name.into(),
            function_arn: arn::function_arn("us-east-1", name),
            runtime: "go1.x".into(),
            role: "foobar".into(),
            handler: "fake".into(),
            code_size: 22,
            description: None,
            timeout: 16,
            memory_size: 128,
            last_modified: Utc::now(),
            code_sha256: String::new(),
            version: LATEST_VERSION.into(),
            environment: BTreeMap::new(),
            revision_id: String::new(),
            container: ContainerInspect {
                id: container_id.into(),
                addr: format!("lambox-{name}:9001"),
            },
        }
    }

    #[test]
    fn lookups_return_the_registered_record() {
        let registry = InMemoryRegistry::new("us-east-1");
        let stored = registry.register(record("mytest", "c1"));

        let by_name = registry.get_by_name("mytest").unwrap();
        let by_arn = registry
            .get_by_arn("arn:aws:lambda:us-east-1:000000000000:function:mytest")
            .unwrap();
        assert!(Arc::ptr_eq(&stored, &by_name));
        assert!(Arc::ptr_eq(&stored, &by_arn));
    }

    #[test]
    fn arn_lookup_requires_matching_region_and_shape() {
        let registry = InMemoryRegistry::new("us-east-1");
        registry.register(record("mytest", "c1"));

        for arn in [
            "arn:aws:lambda:eu-west-1:000000000000:function:mytest",
            "arn:aws:lambda:us-east-1:000000000000:function:mytest:$LATEST",
            "arn:aws:lambda:us-east-1:000000000000:layer:mytest",
            "mytest",
        ] {
            assert!(registry.get_by_arn(arn).is_none(), "{arn}");
        }
    }

    #[test]
    fn unknown_name_is_absent() {
        let registry = InMemoryRegistry::new("us-east-1");
        assert!(registry.get_by_name("nope").is_none());
        assert!(registry.list().is_empty());
        assert!(registry.container_ids().is_empty());
    }

    #[test]
    fn reregistering_replaces_record() {
        let registry = InMemoryRegistry::new("us-east-1");
        registry.register(record("mytest", "c1"));
        registry.register(record("mytest", "c2"));

        assert_eq!(registry.get_by_name("mytest").unwrap().container.id, "c2");
        assert_eq!(registry.container_ids(), vec!["c2".to_string()]);
    }

    #[test]
    fn list_is_sorted_and_ids_cover_every_record() {
        let registry = InMemoryRegistry::new("us-east-1");
        registry.register(record("zeta", "c3"));
        registry.register(record("alpha", "c1"));
        registry.register(record("mid", "c2"));

        let names: Vec<_> = registry
            .list()
            .iter()
            .map(|r| r.function_name.clone())
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);

        let mut ids = registry.container_ids();
        ids.sort();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }
}
