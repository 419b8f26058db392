//! Resources available to the translation: wall-clock time, external interruptions and memory.

use std::cell::Cell;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::errors::TranslateError;

/// Messages that can be sent to a running translation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
}

/// Number of calls to [`Budget::tick`] between two actual checks.
const TICKS_PER_CHECK: u32 = 1024;

/// Limits that are polled by the fixpoint loops of the translation.
///
/// When a limit is exceeded, the loop stops and returns [`TranslateError::OutOfTime`] (or
/// [`TranslateError::OutOfMemory`] for the model size).
pub struct Budget {
    deadline: Option<Instant>,
    signals: Option<Receiver<Signal>>,
    max_model_atoms: Option<usize>,
    ticks: Cell<u32>,
}

impl Budget {
    pub fn unlimited() -> Self {
        Budget {
            deadline: None,
            signals: None,
            max_model_atoms: None,
            ticks: Cell::new(0),
        }
    }

    pub fn new(time_limit: Option<Duration>, signals: Option<Receiver<Signal>>) -> Self {
        Budget {
            deadline: time_limit.map(|limit| Instant::now() + limit),
            signals,
            max_model_atoms: None,
            ticks: Cell::new(0),
        }
    }

    pub fn with_max_model_atoms(mut self, max: Option<usize>) -> Self {
        self.max_model_atoms = max;
        self
    }

    /// Fails if the deadline has passed or if an interruption was received.
    pub fn check(&self) -> Result<(), TranslateError> {
        if let Some(signals) = &self.signals {
            while let Ok(signal) = signals.try_recv() {
                match signal {
                    Signal::Interrupt => {
                        tracing::warn!("Translation interrupted");
                        return Err(TranslateError::OutOfTime);
                    }
                }
            }
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                tracing::warn!("Time limit reached");
                Err(TranslateError::OutOfTime)
            }
            _ => Ok(()),
        }
    }

    /// Same as [`Budget::check`], but only does the (comparatively expensive) check every so often.
    /// Meant to be called once per iteration of inner loops.
    pub fn tick(&self) -> Result<(), TranslateError> {
        let ticks = self.ticks.get() + 1;
        if ticks >= TICKS_PER_CHECK {
            self.ticks.set(0);
            self.check()
        } else {
            self.ticks.set(ticks);
            Ok(())
        }
    }

    pub fn check_model_size(&self, num_atoms: usize) -> Result<(), TranslateError> {
        match self.max_model_atoms {
            Some(max) if num_atoms > max => {
                tracing::warn!("The model has more than {max} atoms");
                Err(TranslateError::OutOfMemory)
            }
            _ => Ok(()),
        }
    }
}

/// Memory set aside at startup, released when the process runs out of memory so that the failure can
/// still be reported.
pub struct MemoryReserve {
    reserve: Option<Vec<u8>>,
}

impl MemoryReserve {
    pub const DEFAULT_SIZE: usize = 32 * 1024 * 1024;

    pub fn allocate(size: usize) -> Self {
        let mut reserve = Vec::new();
        // an allocation failure here only means that there is nothing to release later
        let reserve = match reserve.try_reserve_exact(size) {
            Ok(()) => {
                reserve.resize(size, 0u8);
                Some(reserve)
            }
            Err(_) => None,
        };
        MemoryReserve { reserve }
    }

    pub fn is_held(&self) -> bool {
        self.reserve.is_some()
    }

    pub fn release(&mut self) {
        self.reserve = None;
    }
}

/// Reserves space for `additional` more elements, reporting an allocation failure as an out-of-memory error.
pub fn try_grow<T>(v: &mut Vec<T>, additional: usize) -> Result<(), TranslateError> {
    v.try_reserve(additional).map_err(|_| TranslateError::OutOfMemory)
}
