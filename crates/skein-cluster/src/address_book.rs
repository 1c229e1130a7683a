//! Provider address books.
//!
//! An address book is the authoritative record of which providers exist for
//! a consumer, grouped by origin, and says nothing about connectivity. Every
//! read returns an owned copy so callers can iterate without holding the lock.

use std::collections::{BTreeMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use skein_common::provider::{DIRECT_GROUP, DISCOVERED_GROUP};
use skein_common::{ProviderGroup, ProviderInfo};

/// Thread-safe store of provider groups.
pub trait AddressBook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Merges the group's providers into the group of the same name.
    fn add_providers(&self, group: &ProviderGroup);

    /// Subtracts the group's providers from the group of the same name.
    fn remove_providers(&self, group: &ProviderGroup);

    /// Replaces the contents of one group.
    fn replace_providers(&self, group: &ProviderGroup);

    /// Replaces every group at once.
    fn replace_all_providers(&self, groups: &[ProviderGroup]);

    fn get_group(&self, name: &str) -> Option<ProviderGroup>;

    fn list_groups(&self) -> Vec<ProviderGroup>;

    /// Every provider across all groups, first occurrence wins.
    fn list_all_providers(&self) -> Vec<ProviderInfo>;

    fn count_all(&self) -> usize {
        self.list_all_providers().len()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn merge(target: &mut ProviderGroup, source: &ProviderGroup) {
    for provider in source.providers() {
        target.add(provider.clone());
    }
}

fn subtract(target: &mut ProviderGroup, source: &ProviderGroup) {
    for provider in source.providers() {
        target.remove(provider);
    }
}

fn union<'a>(groups: impl Iterator<Item = &'a ProviderGroup>) -> Vec<ProviderInfo> {
    let mut seen = HashSet::new();
    groups
        .flat_map(|g| g.providers().iter())
        .filter(|p| seen.insert(*p))
        .cloned()
        .collect()
}

/// Address book with exactly two groups: `direct` and `discovered`.
///
/// Updates naming any other group are folded into `discovered`.
#[derive(Debug)]
pub struct SingleGroupAddressBook {
    groups: RwLock<(ProviderGroup, ProviderGroup)>,
}

impl SingleGroupAddressBook {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new((
                ProviderGroup::new(DIRECT_GROUP),
                ProviderGroup::new(DISCOVERED_GROUP),
            )),
        }
    }

    fn slot<'a>(
        groups: &'a mut (ProviderGroup, ProviderGroup),
        name: &str,
    ) -> &'a mut ProviderGroup {
        if name == DIRECT_GROUP {
            &mut groups.0
        } else {
            &mut groups.1
        }
    }
}

impl Default for SingleGroupAddressBook {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressBook for SingleGroupAddressBook {
    fn name(&self) -> &'static str {
        "single"
    }

    fn add_providers(&self, group: &ProviderGroup) {
        if group.is_empty() {
            return;
        }
        let mut groups = write(&self.groups);
        merge(Self::slot(&mut groups, &group.name), group);
    }

    fn remove_providers(&self, group: &ProviderGroup) {
        if group.is_empty() {
            return;
        }
        let mut groups = write(&self.groups);
        subtract(Self::slot(&mut groups, &group.name), group);
    }

    fn replace_providers(&self, group: &ProviderGroup) {
        let mut groups = write(&self.groups);
        let slot = Self::slot(&mut groups, &group.name);
        let name = slot.name.clone();
        *slot = ProviderGroup::with_providers(name, group.providers().iter().cloned());
    }

    fn replace_all_providers(&self, groups: &[ProviderGroup]) {
        let mut direct = ProviderGroup::new(DIRECT_GROUP);
        let mut discovered = ProviderGroup::new(DISCOVERED_GROUP);
        for group in groups {
            if group.name == DIRECT_GROUP {
                merge(&mut direct, group);
            } else {
                merge(&mut discovered, group);
            }
        }
        *write(&self.groups) = (direct, discovered);
    }

    fn get_group(&self, name: &str) -> Option<ProviderGroup> {
        let groups = read(&self.groups);
        match name {
            DIRECT_GROUP => Some(groups.0.clone()),
            DISCOVERED_GROUP => Some(groups.1.clone()),
            _ => None,
        }
    }

    fn list_groups(&self) -> Vec<ProviderGroup> {
        let groups = read(&self.groups);
        vec![groups.0.clone(), groups.1.clone()]
    }

    fn list_all_providers(&self) -> Vec<ProviderInfo> {
        let groups = read(&self.groups);
        union([&groups.0, &groups.1].into_iter())
    }
}

/// Address book holding any number of named groups.
#[derive(Debug, Default)]
pub struct MultiGroupAddressBook {
    groups: RwLock<BTreeMap<String, ProviderGroup>>,
}

impl MultiGroupAddressBook {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AddressBook for MultiGroupAddressBook {
    fn name(&self) -> &'static str {
        "multi"
    }

    fn add_providers(&self, group: &ProviderGroup) {
        if group.is_empty() {
            return;
        }
        let mut groups = write(&self.groups);
        let target = groups
            .entry(group.name.clone())
            .or_insert_with(|| ProviderGroup::new(group.name.clone()));
        merge(target, group);
    }

    fn remove_providers(&self, group: &ProviderGroup) {
        if group.is_empty() {
            return;
        }
        let mut groups = write(&self.groups);
        if let Some(target) = groups.get_mut(&group.name) {
            subtract(target, group);
        }
    }

    fn replace_providers(&self, group: &ProviderGroup) {
        let replacement = ProviderGroup::with_providers(group.name.clone(), group.providers().iter().cloned());
        write(&self.groups).insert(group.name.clone(), replacement);
    }

    fn replace_all_providers(&self, groups: &[ProviderGroup]) {
        let mut replacement: BTreeMap<String, ProviderGroup> = BTreeMap::new();
        for group in groups {
            let target = replacement
                .entry(group.name.clone())
                .or_insert_with(|| ProviderGroup::new(group.name.clone()));
            merge(target, group);
        }
        *write(&self.groups) = replacement;
    }

    fn get_group(&self, name: &str) -> Option<ProviderGroup> {
        read(&self.groups).get(name).cloned()
    }

    fn list_groups(&self) -> Vec<ProviderGroup> {
        read(&self.groups).values().cloned().collect()
    }

    fn list_all_providers(&self) -> Vec<ProviderInfo> {
        union(read(&self.groups).values())
    }
}
