use std::{env, fmt};

use crate::{Result, TrainErr};

/// The distributed launch information of a worker, usually taken from the environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchParams {
    pub local_rank: Option<usize>,
    pub world_size: Option<usize>,
}

impl LaunchParams {
    /// Reads `LOCAL_RANK` and `WORLD_SIZE` from the environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the launch parameters through `lookup`.
    ///
    /// A `LOCAL_RANK` of `-1` means single device, like a missing one.
    ///
    /// # Returns
    /// An `InvalidConfig` error if some value isn't an integer.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str| -> Result<Option<i64>> {
            lookup(key)
                .map(|raw| {
                    raw.trim().parse::<i64>().map_err(|e| {
                        TrainErr::InvalidConfig(format!("{key}={raw:?} is not an integer: {e}"))
                    })
                })
                .transpose()
        };

        let local_rank = match parse("LOCAL_RANK")? {
            None | Some(-1) => None,
            Some(r) => Some(usize::try_from(r).map_err(|_| {
                TrainErr::InvalidConfig(format!("LOCAL_RANK must be -1 or non negative, got {r}"))
            })?),
        };

        let world_size = match parse("WORLD_SIZE")? {
            None => None,
            Some(w) => Some(usize::try_from(w).ok().filter(|w| *w > 0).ok_or_else(|| {
                TrainErr::InvalidConfig(format!("WORLD_SIZE must be positive, got {w}"))
            })?),
        };

        Ok(Self {
            local_rank,
            world_size,
        })
    }

    /// The launch parameters of one rank of a run of `world_size` workers.
    pub fn for_rank(local_rank: usize, world_size: usize) -> Self {
        Self {
            local_rank: Some(local_rank),
            world_size: Some(world_size),
        }
    }
}

/// A logical compute slot, owned by exactly one worker during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    pub ordinal: usize,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu:{}", self.ordinal)
    }
}

/// Who a worker is within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerIdentity {
    /// `None` in single device runs.
    pub local_rank: Option<usize>,
    pub world_size: usize,
    pub device: Device,
}

impl WorkerIdentity {
    /// The rank of the worker, `0` in single device runs.
    pub fn rank(&self) -> usize {
        self.local_rank.unwrap_or(0)
    }

    /// Whether this worker writes checkpoints and the run log.
    pub fn is_coordinator(&self) -> bool {
        self.rank() == 0
    }

    pub fn is_distributed(&self) -> bool {
        self.local_rank.is_some()
    }
}

/// Derives the identity of a worker from its launch parameters.
///
/// Without a rank the worker runs single device on device `0`, otherwise it owns the device with
/// the same ordinal as its rank.
pub fn resolve(params: &LaunchParams) -> WorkerIdentity {
    match params.local_rank {
        None => WorkerIdentity {
            local_rank: None,
            world_size: 1,
            device: Device { ordinal: 0 },
        },
        Some(rank) => WorkerIdentity {
            local_rank: Some(rank),
            world_size: params.world_size.unwrap_or(1),
            device: Device { ordinal: rank },
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn no_launch_information_is_single_device() {
        let params = LaunchParams::from_lookup(lookup(&[])).unwrap();
        let identity = resolve(&params);

        assert_eq!(identity.local_rank, None);
        assert_eq!(identity.world_size, 1);
        assert_eq!(identity.device, Device { ordinal: 0 });
        assert!(identity.is_coordinator());
        assert!(!identity.is_distributed());
    }

    #[test]
    fn minus_one_rank_is_single_device() {
        let params = LaunchParams::from_lookup(lookup(&[("LOCAL_RANK", "-1")])).unwrap();
        assert_eq!(params.local_rank, None);
    }

    #[test]
    fn device_follows_rank() {
        let params =
            LaunchParams::from_lookup(lookup(&[("LOCAL_RANK", "2"), ("WORLD_SIZE", "4")])).unwrap();
        let identity = resolve(&params);

        assert_eq!(identity.local_rank, Some(2));
        assert_eq!(identity.world_size, 4);
        assert_eq!(identity.device.to_string(), "cpu:2");
        assert!(!identity.is_coordinator());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(LaunchParams::from_lookup(lookup(&[("LOCAL_RANK", "one")])).is_err());
        assert!(LaunchParams::from_lookup(lookup(&[("LOCAL_RANK", "-3")])).is_err());
        assert!(LaunchParams::from_lookup(lookup(&[("WORLD_SIZE", "0")])).is_err());
    }
}
