// Ownership registry for the GPIO header
//
// Every physical line (a numbered pin, or a shared bus that reserves a fixed
// set of pins) has at most one live owner. Owners are move-only handles that
// hand their lines back to the registry when they are released or dropped.

mod handle;
pub mod io;
#[cfg(feature = "rpi")]
pub mod rpi;

pub use handle::{DeviceHandle, I2cBus, Pin, SpiBus, UartBus};

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::debug;

use crate::config::{FIRST_GPIO_PIN, GPIO_PIN_COUNT, I2C_PINS, SPI_PINS, UART_PINS};
use crate::error::{PlatformError, Result};
use crate::lock;

/// A physical resource that can be handed out by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// A single pin, BCM numbering
    Pin(u8),
    Spi,
    I2c,
    Uart,
}

impl Resource {
    /// BCM numbers of every pin this resource reserves
    pub fn pins(&self) -> Vec<u8> {
        match self {
            Resource::Pin(number) => vec![*number],
            Resource::Spi => SPI_PINS.to_vec(),
            Resource::I2c => I2C_PINS.to_vec(),
            Resource::Uart => UART_PINS.to_vec(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Pin(number) => write!(f, "pin {}", number),
            Resource::Spi => write!(f, "SPI bus"),
            Resource::I2c => write!(f, "I2C bus"),
            Resource::Uart => write!(f, "UART bus"),
        }
    }
}

/// Allocation table for all GPIO lines.
///
/// One table exists per process ([`ResourceRegistry::global`]); independent
/// tables can be created with [`ResourceRegistry::new`], which is what tests
/// and simulations do. All allocation and release calls run under a single
/// lock that is never held across device I/O.
#[derive(Debug)]
pub struct ResourceRegistry {
    owned: Mutex<[bool; GPIO_PIN_COUNT]>,
}

static GLOBAL_REGISTRY: OnceLock<Arc<ResourceRegistry>> = OnceLock::new();

impl ResourceRegistry {
    /// Create a table with every line unowned
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            owned: Mutex::new([false; GPIO_PIN_COUNT]),
        })
    }

    /// The process-wide table, created on first use
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL_REGISTRY.get_or_init(ResourceRegistry::new))
    }

    /// Take ownership of a single pin
    ///
    /// # Errors
    /// [`PlatformError::OutOfRange`] if `number` is not on the header,
    /// [`PlatformError::AlreadyAllocated`] if another handle owns it.
    pub fn allocate_pin(self: &Arc<Self>, number: u8) -> Result<Pin> {
        self.claim(Resource::Pin(number)).map(Pin::new)
    }

    /// Take ownership of the SPI bus (CE1, CE0, MISO, MOSI, SCLK)
    pub fn allocate_spi(self: &Arc<Self>) -> Result<SpiBus> {
        self.claim(Resource::Spi).map(SpiBus::new)
    }

    /// Take ownership of the I2C bus (SDA, SCL)
    pub fn allocate_i2c(self: &Arc<Self>) -> Result<I2cBus> {
        self.claim(Resource::I2c).map(I2cBus::new)
    }

    /// Take ownership of the UART bus (TXD, RXD)
    pub fn allocate_uart(self: &Arc<Self>) -> Result<UartBus> {
        self.claim(Resource::Uart).map(UartBus::new)
    }

    /// Hand a resource back before its handle goes out of scope.
    ///
    /// Idempotent: releasing an inert handle does nothing.
    pub fn release<H: DeviceHandle>(&self, handle: &mut H) {
        handle.release();
    }

    /// Whether any pin reserved by `resource` is currently owned
    pub fn is_allocated(&self, resource: Resource) -> Result<bool> {
        let slots = slots(resource)?;
        let owned = lock(&self.owned);
        Ok(slots.iter().any(|&slot| owned[slot]))
    }

    fn claim(self: &Arc<Self>, resource: Resource) -> Result<handle::Lease> {
        let slots = slots(resource)?;

        let mut owned = lock(&self.owned);
        if slots.iter().any(|&slot| owned[slot]) {
            return Err(PlatformError::AlreadyAllocated { resource });
        }
        for &slot in &slots {
            owned[slot] = true;
        }
        drop(owned);

        debug!("Allocated {}", resource);
        Ok(handle::Lease::new(Arc::clone(self), resource))
    }

    fn free(&self, resource: Resource) {
        // Slots were validated when the lease was created
        if let Ok(slots) = slots(resource) {
            let mut owned = lock(&self.owned);
            for slot in slots {
                owned[slot] = false;
            }
        }
        debug!("Released {}", resource);
    }
}

/// Map a resource onto indices of the ownership table
fn slots(resource: Resource) -> Result<Vec<usize>> {
    resource
        .pins()
        .into_iter()
        .map(|pin| {
            let index = pin.checked_sub(FIRST_GPIO_PIN).map(usize::from);
            match index {
                Some(index) if index < GPIO_PIN_COUNT => Ok(index),
                _ => Err(PlatformError::OutOfRange { pin }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_pin_cannot_be_allocated_twice() {
        let registry = ResourceRegistry::new();

        let first = registry.allocate_pin(5).unwrap();
        let second = registry.allocate_pin(5);
        assert!(matches!(
            second,
            Err(PlatformError::AlreadyAllocated {
                resource: Resource::Pin(5)
            })
        ));

        drop(first);
        let third = registry.allocate_pin(5).unwrap();
        assert_eq!(third.number(), 5);
    }

    #[test]
    fn test_pin_numbers_outside_header_are_rejected() {
        let registry = ResourceRegistry::new();
        assert!(matches!(
            registry.allocate_pin(1),
            Err(PlatformError::OutOfRange { pin: 1 })
        ));
        assert!(matches!(
            registry.allocate_pin(28),
            Err(PlatformError::OutOfRange { pin: 28 })
        ));
        assert!(registry.allocate_pin(2).is_ok());
        assert!(registry.allocate_pin(27).is_ok());
    }

    #[test]
    fn test_buses_reserve_their_pins() {
        let registry = ResourceRegistry::new();

        let spi = registry.allocate_spi().unwrap();
        assert!(matches!(
            registry.allocate_pin(9),
            Err(PlatformError::AlreadyAllocated { .. })
        ));
        assert!(matches!(
            registry.allocate_spi(),
            Err(PlatformError::AlreadyAllocated {
                resource: Resource::Spi
            })
        ));
        drop(spi);

        let pin = registry.allocate_pin(3).unwrap();
        assert!(matches!(
            registry.allocate_i2c(),
            Err(PlatformError::AlreadyAllocated {
                resource: Resource::I2c
            })
        ));
        drop(pin);
        assert!(registry.allocate_i2c().is_ok());
        assert!(registry.allocate_uart().is_ok());
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = ResourceRegistry::new();

        let mut uart = registry.allocate_uart().unwrap();
        registry.release(&mut uart);
        assert!(!uart.owns_resource());
        assert!(!registry.is_allocated(Resource::Uart).unwrap());

        // A new owner must survive the old handle being released again and dropped
        let new_owner = registry.allocate_uart().unwrap();
        registry.release(&mut uart);
        drop(uart);
        assert!(new_owner.owns_resource());
        assert!(registry.is_allocated(Resource::Uart).unwrap());
    }

    #[test]
    fn test_moved_handle_keeps_ownership() {
        let registry = ResourceRegistry::new();

        let pin = registry.allocate_pin(17).unwrap();
        let mut pins = Vec::new();
        pins.push(pin);
        assert!(registry.is_allocated(Resource::Pin(17)).unwrap());

        pins.clear();
        assert!(!registry.is_allocated(Resource::Pin(17)).unwrap());
    }

    #[test]
    fn test_released_handle_reports_error() {
        let registry = ResourceRegistry::new();
        let mut pin = registry.allocate_pin(22).unwrap();
        assert!(pin.ensure_owned().is_ok());

        pin.release();
        assert!(matches!(
            pin.ensure_owned(),
            Err(PlatformError::ResourceReleased {
                resource: Resource::Pin(22)
            })
        ));
    }

    #[test]
    fn test_no_double_allocation_across_threads() {
        let registry = ResourceRegistry::new();
        // One flag per header line, set while a handle owning that line is alive
        let held: Arc<Vec<AtomicBool>> =
            Arc::new((0..GPIO_PIN_COUNT).map(|_| AtomicBool::new(false)).collect());
        let resources = [Resource::Pin(8), Resource::Spi, Resource::Pin(10), Resource::Pin(5)];

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                let held = Arc::clone(&held);
                thread::spawn(move || {
                    for round in 0..500 {
                        let resource = resources[(worker + round) % resources.len()];
                        let allocation = match resource {
                            Resource::Pin(number) => registry.allocate_pin(number).map(|pin| {
                                let resource = pin.resource();
                                (Box::new(pin) as Box<dyn DeviceHandle + Send>, resource)
                            }),
                            _ => registry.allocate_spi().map(|spi| {
                                let resource = spi.resource();
                                (Box::new(spi) as Box<dyn DeviceHandle + Send>, resource)
                            }),
                        };

                        if let Ok((handle, resource)) = allocation {
                            let slots = slots(resource).unwrap();
                            for &slot in &slots {
                                assert!(
                                    !held[slot].swap(true, Ordering::SeqCst),
                                    "{} granted twice",
                                    resource
                                );
                            }
                            thread::yield_now();
                            for &slot in &slots {
                                held[slot].store(false, Ordering::SeqCst);
                            }
                            drop(handle);
                        }
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        for resource in resources {
            assert!(!registry.is_allocated(resource).unwrap());
        }
    }
}
