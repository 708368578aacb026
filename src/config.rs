/// Configuration for the packet engine's ring set.
#[derive(Clone)]
pub struct Config {
    /// Number of independent ring pairs. Sessions are assigned round-robin.
    pub rings: u32,
    /// Descriptors per ring (command and result rings are the same size).
    /// Must be a power of two. A ring holds at most `ring_size - 1` live
    /// descriptors.
    pub ring_size: u32,
    /// Preallocated request slots per ring. Each slot carries a context
    /// record and an auxiliary token buffer, so this bounds both in-flight
    /// requests and DMA memory per ring.
    pub slots_per_ring: u16,
    /// Maximum combined command + result descriptors flushed under one
    /// hardware "prepared" notification pair. A single request larger than
    /// this still forms its own batch.
    pub max_batch_descs: u32,
    /// Maximum descriptors (command + result) one operation may occupy.
    /// Chains that would exceed this fail to build and are rolled back.
    pub max_op_descs: u16,
    /// Completed-packet count at which the ring raises its completion
    /// interrupt. 1 = interrupt per packet.
    pub intr_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rings: 4,
            ring_size: 512,
            slots_per_ring: 128,
            max_batch_descs: 128,
            max_op_descs: 64,
            intr_threshold: 1,
        }
    }
}

impl Config {
    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        use crate::error::Error;
        if self.rings == 0 || self.rings > 64 {
            return Err(Error::Config("rings must be in 1..=64"));
        }
        if !self.ring_size.is_power_of_two() || self.ring_size < 4 || self.ring_size > 0x10000 {
            return Err(Error::Config(
                "ring_size must be a power of two in 4..=65536",
            ));
        }
        if self.slots_per_ring == 0 || self.slots_per_ring as u32 > self.ring_size {
            return Err(Error::Config("slots_per_ring must be in 1..=ring_size"));
        }
        if self.max_batch_descs == 0 {
            return Err(Error::Config("max_batch_descs must be > 0"));
        }
        if self.max_op_descs < 2 || self.max_op_descs as u32 >= self.ring_size {
            return Err(Error::Config("max_op_descs must be in 2..ring_size"));
        }
        if self.intr_threshold == 0 {
            return Err(Error::Config("intr_threshold must be > 0"));
        }
        Ok(())
    }
}

/// Builder for [`Config`] with discoverable methods and `build()` validation.
///
/// # Example
///
/// ```rust
/// use xcelring::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .rings(2)
///     .ring_size(256)
///     .slots_per_ring(32)
///     .max_batch_descs(64)
///     .build()
///     .expect("invalid config");
/// ```
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of ring pairs.
    pub fn rings(mut self, n: u32) -> Self {
        self.config.rings = n;
        self
    }

    /// Set the descriptor count per ring. Must be a power of two.
    pub fn ring_size(mut self, n: u32) -> Self {
        self.config.ring_size = n;
        self
    }

    /// Set the number of preallocated request slots per ring.
    pub fn slots_per_ring(mut self, n: u16) -> Self {
        self.config.slots_per_ring = n;
        self
    }

    /// Set the maximum descriptors per flushed batch.
    pub fn max_batch_descs(mut self, n: u32) -> Self {
        self.config.max_batch_descs = n;
        self
    }

    /// Set the maximum descriptors one operation may occupy.
    pub fn max_op_descs(mut self, n: u16) -> Self {
        self.config.max_op_descs = n;
        self
    }

    /// Set the completion interrupt threshold in packets.
    pub fn intr_threshold(mut self, n: u32) -> Self {
        self.config.intr_threshold = n;
        self
    }

    /// Validate and build the final [`Config`].
    pub fn build(self) -> Result<Config, crate::error::Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}
