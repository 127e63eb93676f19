use std::sync::Arc;

use super::{Resource, ResourceRegistry};
use crate::error::{PlatformError, Result};

/// Common surface of every ownership handle
pub trait DeviceHandle {
    /// The resource this handle was created for
    fn resource(&self) -> Resource;

    /// Whether the handle still owns its resource
    fn owns_resource(&self) -> bool;

    /// Return the resource to the registry; a no-op once released
    fn release(&mut self);

    /// Fail with [`PlatformError::ResourceReleased`] if the handle is inert
    fn ensure_owned(&self) -> Result<()> {
        if self.owns_resource() {
            Ok(())
        } else {
            Err(PlatformError::ResourceReleased {
                resource: self.resource(),
            })
        }
    }
}

/// Registry claim shared by all handle types. Released on drop.
#[derive(Debug)]
pub(super) struct Lease {
    registry: Arc<ResourceRegistry>,
    resource: Resource,
    owned: bool,
}

impl Lease {
    pub(super) fn new(registry: Arc<ResourceRegistry>, resource: Resource) -> Self {
        Self {
            registry,
            resource,
            owned: true,
        }
    }

    fn release(&mut self) {
        if self.owned {
            self.owned = false;
            self.registry.free(self.resource);
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

macro_rules! device_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name {
            lease: Lease,
        }

        impl $name {
            pub(super) fn new(lease: Lease) -> Self {
                Self { lease }
            }
        }

        impl DeviceHandle for $name {
            fn resource(&self) -> Resource {
                self.lease.resource
            }

            fn owns_resource(&self) -> bool {
                self.lease.owned
            }

            fn release(&mut self) {
                self.lease.release();
            }
        }
    };
}

device_handle!(
    /// Exclusive ownership of one header pin
    Pin
);
device_handle!(
    /// Exclusive ownership of the SPI0 bus pins
    SpiBus
);
device_handle!(
    /// Exclusive ownership of the I2C1 bus pins
    I2cBus
);
device_handle!(
    /// Exclusive ownership of the primary UART pins
    UartBus
);

impl Pin {
    /// BCM number of the pin
    pub fn number(&self) -> u8 {
        match self.lease.resource {
            Resource::Pin(number) => number,
            // Pin handles are only ever created for Resource::Pin
            _ => 0,
        }
    }
}
