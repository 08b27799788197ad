//! Service Table - 이름으로 공유되는 서비스
//!
//! 서비스는 제공한 scope에 귀속되며, 그 scope가 정리되면 함께 제거됩니다.

use crate::scope::ScopeId;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use weave_foundation::{Error, Result};

/// 서비스 값
pub type ServiceValue = Arc<dyn Any + Send + Sync>;

struct ServiceEntry {
    value: ServiceValue,
    owner: ScopeId,
    type_name: &'static str,
}

#[derive(Default)]
pub(crate) struct ServiceTable {
    services: HashMap<String, ServiceEntry>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 서비스 등록 - 이미 다른 scope가 제공 중이면 충돌
    pub fn insert(
        &mut self,
        name: &str,
        value: ServiceValue,
        owner: ScopeId,
        type_name: &'static str,
    ) -> Result<()> {
        if let Some(existing) = self.services.get(name) {
            return Err(Error::ServiceConflict(format!(
                "{} (provided by {})",
                name, existing.owner
            )));
        }

        debug!(service = name, owner = %owner, type_name, "Service provided");
        self.services.insert(
            name.to_string(),
            ServiceEntry {
                value,
                owner,
                type_name,
            },
        );
        Ok(())
    }

    /// 소유 scope가 일치할 때만 제거
    pub fn remove_if_owner(&mut self, name: &str, owner: ScopeId) -> bool {
        match self.services.get(name) {
            Some(entry) if entry.owner == owner => {
                self.services.remove(name);
                debug!(service = name, owner = %owner, "Service removed");
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<ServiceValue> {
        self.services.get(name).map(|entry| Arc::clone(&entry.value))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// (이름, 타입 이름) 목록
    pub fn describe(&self) -> Vec<(String, &'static str)> {
        let mut list: Vec<_> = self
            .services
            .iter()
            .map(|(name, entry)| (name.clone(), entry.type_name))
            .collect();
        list.sort();
        list
    }
}
