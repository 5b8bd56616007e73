use crate::error::{ShellError, ShellResult};
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};

/// Bag of every descriptor opened while planning one command line.
///
/// The registry is the only owner of those descriptors. Command nodes refer
/// to them by raw number and give them back through [`release`](Self::release)
/// once they have been handed to a process, so each descriptor is closed
/// exactly once no matter how many times the line asks for it.
#[derive(Debug)]
pub struct DescriptorRegistry {
    slots: Vec<Option<OwnedFd>>,
}

impl DescriptorRegistry {
    /// Create an empty registry holding at most `capacity` descriptors.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    /// Take ownership of `fd` and return its raw number.
    pub fn add(&mut self, fd: OwnedFd) -> ShellResult<RawFd> {
        let capacity = self.slots.len();
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(ShellError::TooManyDescriptors(capacity))?;
        let raw = fd.as_raw_fd();
        *slot = Some(fd);
        Ok(raw)
    }

    /// Close the registered descriptor `fd`. Unknown or already released
    /// descriptors are ignored.
    pub fn release(&mut self, fd: RawFd) {
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|owned| owned.as_raw_fd() == fd))
        {
            log::trace!("closing fd {fd}");
            *slot = None;
        }
    }

    /// Stop tracking `fd` without closing it.
    pub fn forget(&mut self, fd: RawFd) {
        if let Some(owned) = self
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|owned| owned.as_raw_fd() == fd))
            .and_then(Option::take)
        {
            let _ = owned.into_raw_fd();
        }
    }

    /// Close every descriptor still held and mark all slots empty.
    pub fn drain(&mut self) {
        for slot in &mut self.slots {
            // Dropping the OwnedFd closes it.
            slot.take();
        }
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|owned| owned.as_raw_fd() == fd)
    }

    /// Number of descriptors currently held.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
