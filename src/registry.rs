// Copyright (c) Chime, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Trading pair registry.
//!
//! Pairs are configuration, not chain state: the deployment ships a JSON file
//! naming each pair and its oracle contract, and the registry serves lookups
//! from that fixed set.

use crate::types::Pair;
use anyhow::{anyhow, Context};
use std::collections::HashMap;
use std::path::Path;

pub trait PairRegistry: Send + Sync {
    fn lookup_pair_by_oracle(&self, oracle_address: &str) -> Option<&Pair>;
    fn lookup_pair_by_id(&self, pair_id: &str) -> Option<&Pair>;
    fn list_pairs(&self) -> &[Pair];
}

pub struct StaticPairRegistry {
    pairs: Vec<Pair>,
    by_oracle: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
}

impl StaticPairRegistry {
    pub fn new(pairs: Vec<Pair>) -> anyhow::Result<Self> {
        let mut by_oracle = HashMap::new();
        let mut by_id = HashMap::new();
        for (i, pair) in pairs.iter().enumerate() {
            if by_oracle.insert(pair.oracle_address.clone(), i).is_some() {
                return Err(anyhow!(
                    "pairs {:?} share oracle address {}",
                    pairs
                        .iter()
                        .filter(|p| p.oracle_address == pair.oracle_address)
                        .map(|p| &p.id)
                        .collect::<Vec<_>>(),
                    pair.oracle_address
                ));
            }
            if by_id.insert(pair.id.clone(), i).is_some() {
                return Err(anyhow!("duplicate pair id {}", pair.id));
            }
        }
        Ok(Self {
            pairs,
            by_oracle,
            by_id,
        })
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading pairs file {}", path.display()))?;
        let pairs: Vec<Pair> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing pairs file {}", path.display()))?;
        Self::new(pairs)
    }
}

impl PairRegistry for StaticPairRegistry {
    fn lookup_pair_by_oracle(&self, oracle_address: &str) -> Option<&Pair> {
        self.by_oracle.get(oracle_address).map(|i| &self.pairs[*i])
    }

    fn lookup_pair_by_id(&self, pair_id: &str) -> Option<&Pair> {
        self.by_id.get(pair_id).map(|i| &self.pairs[*i])
    }

    fn list_pairs(&self) -> &[Pair] {
        &self.pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_pair;

    #[test]
    fn test_lookups() {
        let pair = test_pair();
        let registry = StaticPairRegistry::new(vec![pair.clone()]).unwrap();

        assert_eq!(
            registry.lookup_pair_by_oracle(&pair.oracle_address),
            Some(&pair)
        );
        assert_eq!(registry.lookup_pair_by_id(&pair.id), Some(&pair));
        assert_eq!(registry.lookup_pair_by_oracle("missing"), None);
        assert_eq!(registry.lookup_pair_by_id("missing"), None);
        assert_eq!(registry.list_pairs().len(), 1);
    }

    #[test]
    fn test_rejects_duplicate_oracle() {
        let a = test_pair();
        let mut b = test_pair();
        b.id = "other-pair".to_string();
        assert!(StaticPairRegistry::new(vec![a, b]).is_err());
    }

    #[test]
    fn test_from_file() {
        let pair = test_pair();
        let dir = std::env::temp_dir().join("chime-registry-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pairs.json");
        std::fs::write(&path, serde_json::to_string(&vec![pair.clone()]).unwrap()).unwrap();

        let registry = StaticPairRegistry::from_file(&path).unwrap();
        assert_eq!(registry.list_pairs(), &[pair]);

        assert!(StaticPairRegistry::from_file(&dir.join("missing.json")).is_err());
    }
}
