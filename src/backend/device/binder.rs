use std::{os::unix::io::BorrowedFd, ptr::NonNull};

use tracing::{debug, instrument, trace, warn};

use super::{DeviceAddress, DeviceContext, DeviceDriver, DeviceError, MemDesc};
use crate::error::WsError;

/// Errors of the device memory binder
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    /// The region is null, empty or wraps around the address space
    #[error("The memory region is null, empty or wraps around the address space")]
    BadAddress,
    /// The driver could not wrap the region
    #[error("Failed to wrap the memory region")]
    OutOfMemory(#[source] DeviceError),
    /// The driver could not import the buffer
    #[error("Failed to import the buffer")]
    ImportFailed(#[source] DeviceError),
    /// The allocation could not be mapped into the device address space
    #[error("Failed to map the allocation into the device address space")]
    MapFailed(#[source] DeviceError),
}

impl From<BindError> for WsError {
    fn from(err: BindError) -> WsError {
        match err {
            BindError::BadAddress => WsError::BadNativePixmap,
            BindError::OutOfMemory(_) | BindError::ImportFailed(_) | BindError::MapFailed(_) => {
                WsError::OutOfMemory
            }
        }
    }
}

/// A device-visible mapping of a buffer
///
/// Mappings are not copyable, each one has to be handed back through
/// [`DeviceContext::unbind`] exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct Mapping {
    memdesc: MemDesc,
    address: DeviceAddress,
    size: u64,
}

impl Mapping {
    /// Allocation backing the mapping
    pub fn memdesc(&self) -> MemDesc {
        self.memdesc
    }

    /// Device address of the first byte of the buffer
    pub fn device_address(&self) -> DeviceAddress {
        self.address
    }

    /// Size of the mapped allocation in bytes
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl<D: DeviceDriver> DeviceContext<D> {
    /// Wrap a cpu memory region owned outside of the window system
    ///
    /// The region is widened to whole device pages. The returned mapping points at `address`
    /// itself, not at the start of the first page.
    #[instrument(level = "trace", skip(self), err)]
    pub fn bind_external_memory(&self, address: *const u8, size: usize) -> Result<Mapping, BindError> {
        let page = rustix::param::page_size();
        let address = address as usize;
        if address == 0 || size == 0 {
            return Err(BindError::BadAddress);
        }

        let base = address & !(page - 1);
        let offset = address - base;
        let span = offset
            .checked_add(size)
            .and_then(|end| end.checked_add(page - 1))
            .map(|end| end & !(page - 1))
            .ok_or(BindError::BadAddress)?;
        if base.checked_add(span).is_none() {
            return Err(BindError::BadAddress);
        }

        let driver = self.driver();
        let memdesc = driver
            .wrap_external_memory(self.handles.memory_context, base, span, page, "wsglue_external")
            .map_err(BindError::OutOfMemory)?;
        let device_base = match driver.map_to_device(memdesc, self.handles.heap) {
            Ok(addr) => addr,
            Err(err) => {
                driver.free_memory(memdesc);
                return Err(BindError::MapFailed(err));
            }
        };

        trace!(memdesc = memdesc.0, base, span, "Bound external memory");
        Ok(Mapping {
            memdesc,
            address: device_base.offset(offset as u64),
            size: span as u64,
        })
    }

    /// Import a shareable buffer handle
    ///
    /// Returns the mapping together with the size the driver reports for the allocation.
    #[instrument(level = "trace", skip(self, fd), err)]
    pub fn bind_imported_buffer(&self, fd: BorrowedFd<'_>, name: &str) -> Result<(Mapping, u64), BindError> {
        let driver = self.driver();
        let (memdesc, size) = driver
            .import_dmabuf(self.handles.connection, fd, name)
            .map_err(BindError::ImportFailed)?;
        let address = match driver.map_to_device(memdesc, self.handles.heap) {
            Ok(addr) => addr,
            Err(err) => {
                driver.free_memory(memdesc);
                return Err(BindError::MapFailed(err));
            }
        };

        trace!(memdesc = memdesc.0, size, "Imported buffer");
        Ok((
            Mapping {
                memdesc,
                address,
                size,
            },
            size,
        ))
    }

    /// Release a mapping and the allocation behind it
    ///
    /// Passing `None` does nothing, so a slot can hand over its mapping with [`Option::take`]
    /// any number of times.
    pub fn unbind(&self, mapping: Option<Mapping>) {
        let Some(mapping) = mapping else {
            return;
        };

        let outstanding = self.inner.state.borrow_mut().cpu_mappings.remove(&mapping.memdesc);
        if let Some(count) = outstanding {
            warn!(memdesc = mapping.memdesc.0, count, "Unbinding a buffer that is still cpu mapped");
            for _ in 0..count {
                self.driver().release_cpu_mapping(mapping.memdesc);
            }
        }

        self.driver().release_device_mapping(mapping.memdesc);
        self.driver().free_memory(mapping.memdesc);
        trace!(memdesc = mapping.memdesc.0, "Unbound buffer");
    }

    /// Acquire a cpu pointer to an allocation
    ///
    /// Every successful call must be paired with one [`DeviceContext::release_cpu_address`].
    pub fn cpu_address(&self, memdesc: MemDesc) -> Result<NonNull<u8>, WsError> {
        let ptr = self.driver().acquire_cpu_mapping(memdesc).map_err(|err| {
            debug!(memdesc = memdesc.0, ?err, "Failed to acquire a cpu mapping");
            WsError::BadDrawable
        })?;
        *self
            .inner
            .state
            .borrow_mut()
            .cpu_mappings
            .entry(memdesc)
            .or_insert(0) += 1;
        Ok(ptr)
    }

    /// Release a cpu pointer acquired with [`DeviceContext::cpu_address`]
    ///
    /// Releasing an allocation without an outstanding cpu mapping does nothing.
    pub fn release_cpu_address(&self, memdesc: MemDesc) {
        {
            let mut state = self.inner.state.borrow_mut();
            match state.cpu_mappings.get_mut(&memdesc) {
                Some(count) if *count > 1 => *count -= 1,
                Some(_) => {
                    state.cpu_mappings.remove(&memdesc);
                }
                None => {
                    trace!(memdesc = memdesc.0, "No outstanding cpu mapping to release");
                    return;
                }
            }
        }
        self.driver().release_cpu_mapping(memdesc);
    }
}
