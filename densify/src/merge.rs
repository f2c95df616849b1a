//! Merge of a sparse, ordered observation stream onto a complete reference
//!
//! Strategy
//!
//! The reference units and the observations are walked in lock step.  The
//! reference side advances by exactly one unit for every record emitted; the
//! observation side advances only when its key matches the current unit.  Units
//! with no observation get a record with `obs: None`, so every sample yields
//! exactly one record per unit, in reference order.
//!
//! Observations must arrive in strictly increasing key order.  Anything else
//! means that the sample and the reference were built from different catalogs,
//! and the merge stops with an error as soon as the offending observation is
//! pulled.
use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    iter::Fuse,
};

use crate::error::DensifyError;

/// Anything that can be placed on the reference coordinate axis
pub trait Keyed {
    type Key: Ord + Copy;

    fn key(&self) -> Self::Key;
}

/// One output record per reference unit
#[derive(Debug, Clone, PartialEq)]
pub struct Dense<U, T> {
    pub unit: U,
    pub obs: Option<T>,
}

impl<U, T> Dense<U, T> {
    pub fn is_observed(&self) -> bool {
        self.obs.is_some()
    }
}

pub struct Densify<I, J, T>
where
    J: Iterator<Item = anyhow::Result<T>>,
    T: Keyed,
{
    units: I,
    obs: Fuse<J>,
    pending: Option<T>,
    last_key: Option<T::Key>,
    finished: bool,
}

/// Set up the merge of the observations in obs onto the reference units
pub fn densify<I, J, T>(units: I, obs: J) -> Densify<I::IntoIter, J::IntoIter, T>
where
    I: IntoIterator,
    J: IntoIterator<Item = anyhow::Result<T>>,
    T: Keyed,
{
    Densify {
        units: units.into_iter(),
        obs: obs.into_iter().fuse(),
        pending: None,
        last_key: None,
        finished: false,
    }
}

impl<I, J, T> Densify<I, J, T>
where
    I: Iterator,
    I::Item: Keyed<Key = T::Key> + fmt::Display,
    J: Iterator<Item = anyhow::Result<T>>,
    T: Keyed + fmt::Display,
{
    // Get next observation, checking that the keys are strictly increasing
    fn pull(&mut self) -> anyhow::Result<Option<T>> {
        match self.obs.next() {
            Some(r) => {
                let o = r?;
                let k = o.key();
                if matches!(self.last_key, Some(prev) if k <= prev) {
                    return Err(DensifyError::OrderingViolation {
                        found: o.to_string(),
                        reason: "not after the preceding observation".to_string(),
                    }
                    .into());
                }
                self.last_key = Some(k);
                Ok(Some(o))
            }
            None => Ok(None),
        }
    }

    fn step(&mut self) -> anyhow::Result<Option<Dense<I::Item, T>>> {
        if self.pending.is_none() {
            self.pending = self.pull()?;
        }
        match self.units.next() {
            Some(unit) => {
                let k = unit.key();
                match self.pending.as_ref().map(|o| o.key()) {
                    Some(obs_key) if obs_key == k => Ok(Some(Dense {
                        unit,
                        obs: self.pending.take(),
                    })),
                    // The observation is behind the reference pointer, so it
                    // can not match any unit
                    Some(obs_key) if obs_key < k => Err(DensifyError::UnitNotInReference(
                        self.pending
                            .as_ref()
                            .map(|o| o.to_string())
                            .unwrap_or_default(),
                    )
                    .into()),
                    _ => Ok(Some(Dense { unit, obs: None })),
                }
            }
            None => match self.pending.take() {
                Some(o) => Err(DensifyError::TrailingObservation(o.to_string()).into()),
                None => Ok(None),
            },
        }
    }
}

impl<I, J, T> Iterator for Densify<I, J, T>
where
    I: Iterator,
    I::Item: Keyed<Key = T::Key> + fmt::Display,
    J: Iterator<Item = anyhow::Result<T>>,
    T: Keyed + fmt::Display,
{
    type Item = anyhow::Result<Dense<I::Item, T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.step() {
            Ok(Some(d)) => Some(Ok(d)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Hash keyed version of the merge for unordered catalogs
///
/// Every unit yields a record in the order given by units; accumulated values
/// are taken from obs.  Values left over once the units are exhausted do not
/// belong to the catalog, which is an error.
pub struct HashFill<'a, I, K, V> {
    units: I,
    obs: HashMap<K, V>,
    finished: bool,
    _marker: std::marker::PhantomData<&'a K>,
}

pub fn hash_fill<'a, I, K, V>(units: I, obs: HashMap<K, V>) -> HashFill<'a, I::IntoIter, K, V>
where
    I: IntoIterator<Item = &'a K>,
    K: 'a,
{
    HashFill {
        units: units.into_iter(),
        obs,
        finished: false,
        _marker: std::marker::PhantomData,
    }
}

impl<'a, I, K, V> Iterator for HashFill<'a, I, K, V>
where
    I: Iterator<Item = &'a K>,
    K: Hash + Eq + fmt::Display + 'a,
{
    type Item = anyhow::Result<Dense<&'a K, V>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.units.next() {
            Some(unit) => Some(Ok(Dense {
                unit,
                obs: self.obs.remove(unit),
            })),
            None => {
                self.finished = true;
                self.obs.keys().next().map(|k| {
                    Err(DensifyError::UnitNotInReference(k.to_string()).into())
                })
            }
        }
    }
}
