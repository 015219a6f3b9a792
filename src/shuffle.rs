//! Partitioning and the shuffle-merge subsystem.
//!
//! A [`ShuffleBuffer`] is created fresh for each shuffled stage, populated
//! concurrently by all tasks of that stage, frozen at the stage barrier, and
//! re-exposed as one input partition per slot for the next stage. Writers for
//! different partitions run fully concurrently; a single lock per slot makes
//! the per-key compute-and-swap linearizable, so no update is ever lost.
//!
//! Merge operators must be commutative and associative: the order in which
//! concurrent tasks submit values for the same key is unspecified, so a
//! non-associative operator yields non-deterministic results. That is a
//! caller error, not an engine bug.

use crate::error::{FlowError, Result};
use crate::node::{Partition, take};
use crate::stage::ShuffleSpec;
use std::collections::HashMap;
use std::collections::hash_map::{DefaultHasher, Entry};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

/// Default partitioner: `hash(key) mod partition_count`. A pure function of
/// the key and the partition count, stable across repeated calls.
pub fn default_partition<K: Hash>(key: &K, partition_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partition_count.max(1) as u64) as usize
}

/// Concurrent mapping `partition → (key → accumulated value)`, shared by all
/// tasks of one stage and discarded once sealed into the next stage's input.
pub struct ShuffleBuffer {
    slots: Vec<Mutex<Partition>>,
}

impl ShuffleBuffer {
    pub(crate) fn open(spec: &ShuffleSpec) -> Self {
        Self {
            slots: (0..spec.partition_count).map(|_| Mutex::new((spec.open)())).collect(),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.slots.len()
    }

    /// Run `f` against the payload of partition `pid` under its lock.
    /// An index outside the slot range is a fatal partitioning error.
    pub(crate) fn with_slot<R>(&self, pid: usize, f: impl FnOnce(&mut Partition) -> R) -> Result<R> {
        let slot = self.slots.get(pid).ok_or(FlowError::PartitionOutOfRange {
            index: pid,
            partitions: self.slots.len(),
        })?;
        let mut guard = slot
            .lock()
            .map_err(|_| FlowError::Task("shuffle buffer poisoned by a failed task".into()))?;
        Ok(f(&mut guard))
    }

    /// Freeze the buffer and convert each slot into an input partition for
    /// the next stage.
    pub(crate) fn seal(self, spec: &ShuffleSpec) -> Result<Vec<Partition>> {
        self.slots
            .into_iter()
            .map(|slot| {
                let payload = slot
                    .into_inner()
                    .map_err(|_| FlowError::Task("shuffle buffer poisoned by a failed task".into()))?;
                (spec.seal)(payload)
            })
            .collect()
    }
}

fn slot_map<'a, K: 'static, V: 'static>(slot: &'a mut Partition, site: &'static str) -> Result<&'a mut HashMap<K, V>> {
    slot.downcast_mut::<HashMap<K, V>>().ok_or(FlowError::TypeMismatch(site))
}

/// Keyed shuffle with a per-key binary merge: `reduceValues`.
pub(crate) fn keyed_merge_spec<T, K, V, KF, VF, M>(
    partition_count: usize,
    key_fn: KF,
    val_fn: VF,
    merge: M,
) -> ShuffleSpec
where
    T: 'static + Send + Sync,
    K: 'static + Send + Sync + Clone + Eq + Hash,
    V: 'static + Send + Sync + Clone,
    KF: Fn(&T) -> K + Send + Sync + 'static,
    VF: Fn(&T) -> V + Send + Sync + 'static,
    M: Fn(V, V) -> V + Send + Sync + 'static,
{
    ShuffleSpec {
        partition_count,
        classified: false,
        open: Arc::new(|| Box::new(HashMap::<K, V>::new()) as Partition),
        write: Arc::new(move |input, buffer| {
            for record in take::<T>(input, "reduceValues input")? {
                let key = key_fn(&record);
                let value = val_fn(&record);
                let pid = default_partition(&key, partition_count);
                buffer.with_slot(pid, |slot| -> Result<()> {
                    let map = slot_map::<K, V>(slot, "reduceValues buffer")?;
                    match map.entry(key) {
                        Entry::Occupied(mut entry) => {
                            let prev = entry.get().clone();
                            entry.insert(merge(prev, value));
                        }
                        Entry::Vacant(entry) => {
                            entry.insert(value);
                        }
                    }
                    Ok(())
                })??;
            }
            Ok(())
        }),
        seal: Arc::new(|slot| {
            let map = slot
                .downcast::<HashMap<K, V>>()
                .map_err(|_| FlowError::TypeMismatch("reduceValues seal"))?;
            let rows: Vec<(K, V)> = map.into_iter().collect();
            Ok(Box::new(rows) as Partition)
        }),
    }
}

/// Keyed shuffle without a merge operator: values accumulate into a list
/// per key (`aggregateValues`).
pub(crate) fn keyed_gather_spec<T, K, V, KF, VF>(partition_count: usize, key_fn: KF, val_fn: VF) -> ShuffleSpec
where
    T: 'static + Send + Sync,
    K: 'static + Send + Sync + Clone + Eq + Hash,
    V: 'static + Send + Sync + Clone,
    KF: Fn(&T) -> K + Send + Sync + 'static,
    VF: Fn(&T) -> V + Send + Sync + 'static,
{
    ShuffleSpec {
        partition_count,
        classified: false,
        open: Arc::new(|| Box::new(HashMap::<K, Vec<V>>::new()) as Partition),
        write: Arc::new(move |input, buffer| {
            for record in take::<T>(input, "aggregateValues input")? {
                let key = key_fn(&record);
                let value = val_fn(&record);
                let pid = default_partition(&key, partition_count);
                buffer.with_slot(pid, |slot| -> Result<()> {
                    slot_map::<K, Vec<V>>(slot, "aggregateValues buffer")?
                        .entry(key)
                        .or_default()
                        .push(value);
                    Ok(())
                })??;
            }
            Ok(())
        }),
        seal: Arc::new(|slot| {
            let map = slot
                .downcast::<HashMap<K, Vec<V>>>()
                .map_err(|_| FlowError::TypeMismatch("aggregateValues seal"))?;
            let rows: Vec<(K, Vec<V>)> = map.into_iter().collect();
            Ok(Box::new(rows) as Partition)
        }),
    }
}

/// Repartition by a caller-supplied classifier; element type preserved, no
/// merge. Records sharing a classifier value land in the same partition.
pub(crate) fn classify_spec<T, C, F>(partition_count: usize, classifier: F) -> ShuffleSpec
where
    T: 'static + Send + Sync + Clone,
    C: 'static + Send + Sync + Eq + Hash,
    F: Fn(&T) -> C + Send + Sync + 'static,
{
    ShuffleSpec {
        partition_count,
        classified: true,
        open: Arc::new(|| Box::new(HashMap::<C, Vec<T>>::new()) as Partition),
        write: Arc::new(move |input, buffer| {
            for record in take::<T>(input, "classify input")? {
                let class = classifier(&record);
                let pid = default_partition(&class, partition_count);
                buffer.with_slot(pid, |slot| -> Result<()> {
                    slot_map::<C, Vec<T>>(slot, "classify buffer")?
                        .entry(class)
                        .or_default()
                        .push(record);
                    Ok(())
                })??;
            }
            Ok(())
        }),
        seal: Arc::new(|slot| {
            let map = slot
                .downcast::<HashMap<C, Vec<T>>>()
                .map_err(|_| FlowError::TypeMismatch("classify seal"))?;
            let rows: Vec<T> = map.into_values().flatten().collect();
            Ok(Box::new(rows) as Partition)
        }),
    }
}

/// Repartition by a raw caller partitioner. The partitioner owns the index
/// computation, so out-of-range indexes surface as partitioning errors.
pub(crate) fn raw_partition_spec<T, P>(partition_count: usize, partitioner: P) -> ShuffleSpec
where
    T: 'static + Send + Sync,
    P: Fn(&T) -> usize + Send + Sync + 'static,
{
    ShuffleSpec {
        partition_count,
        classified: true,
        open: Arc::new(|| Box::new(Vec::<T>::new()) as Partition),
        write: Arc::new(move |input, buffer| {
            for record in take::<T>(input, "partitionBy input")? {
                let pid = partitioner(&record);
                buffer.with_slot(pid, |slot| -> Result<()> {
                    slot.downcast_mut::<Vec<T>>()
                        .ok_or(FlowError::TypeMismatch("partitionBy buffer"))?
                        .push(record);
                    Ok(())
                })??;
            }
            Ok(())
        }),
        seal: Arc::new(|slot| Ok(slot)),
    }
}

/// Gather every record into a single partition; used by the global
/// operations (`reduce`, `count`, `sorted`, `max`, `min`) when they open
/// their own shuffle. Record order across tasks is unspecified.
pub(crate) fn gather_spec<T>() -> ShuffleSpec
where
    T: 'static + Send + Sync,
{
    ShuffleSpec {
        partition_count: 1,
        classified: false,
        open: Arc::new(|| Box::new(Vec::<T>::new()) as Partition),
        write: Arc::new(move |input, buffer| {
            let mut records = take::<T>(input, "gather input")?;
            buffer.with_slot(0, |slot| -> Result<()> {
                slot.downcast_mut::<Vec<T>>()
                    .ok_or(FlowError::TypeMismatch("gather buffer"))?
                    .append(&mut records);
                Ok(())
            })?
        }),
        seal: Arc::new(|slot| Ok(slot)),
    }
}

/// Element-keyed shuffle for `distinct`: each distinct record survives once
/// per partition, co-located with its duplicates.
pub(crate) fn distinct_spec<T>(partition_count: usize) -> ShuffleSpec
where
    T: 'static + Send + Sync + Clone + Eq + Hash,
{
    ShuffleSpec {
        partition_count,
        classified: false,
        open: Arc::new(|| Box::new(HashMap::<T, ()>::new()) as Partition),
        write: Arc::new(move |input, buffer| {
            for record in take::<T>(input, "distinct input")? {
                let pid = default_partition(&record, partition_count);
                buffer.with_slot(pid, |slot| -> Result<()> {
                    slot_map::<T, ()>(slot, "distinct buffer")?.insert(record, ());
                    Ok(())
                })??;
            }
            Ok(())
        }),
        seal: Arc::new(|slot| {
            let map = slot
                .downcast::<HashMap<T, ()>>()
                .map_err(|_| FlowError::TypeMismatch("distinct seal"))?;
            let rows: Vec<T> = map.into_keys().collect();
            Ok(Box::new(rows) as Partition)
        }),
    }
}
