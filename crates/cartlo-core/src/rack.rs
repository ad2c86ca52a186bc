//! Installed cartridges, keyed by band.
//!
//! The photonic and IF switches are shared, so at most one cartridge in
//! the rack observes at a time. [`CartridgeRack::set_observing`] clears
//! the previous observer before routing the switches to the new one.

use std::collections::BTreeMap;

use cartlo_hal::Band;
use tracing::info;

use crate::cart_assembly::CartAssembly;
use crate::error::{LoError, LoResult, UnitKind};

#[derive(Debug, Default)]
pub struct CartridgeRack {
    carts: BTreeMap<Band, CartAssembly>,
}

impl CartridgeRack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a cartridge, returning any previously installed in its band.
    pub fn insert(&mut self, cart: CartAssembly) -> Option<CartAssembly> {
        let band = cart.band();
        info!(%band, "Cartridge installed");
        self.carts.insert(band, cart)
    }

    /// Remove a cartridge; its monitors and any running operation stop when
    /// the returned value is dropped.
    pub fn remove(&mut self, band: Band) -> Option<CartAssembly> {
        self.carts.remove(&band)
    }

    pub fn get(&self, band: Band) -> Option<&CartAssembly> {
        self.carts.get(&band)
    }

    /// Mutable access for tuning and bias commands.
    ///
    /// Observing changes only through [`set_observing`](Self::set_observing);
    /// the cartridge does not expose it.
    ///
    /// ```compile_fail
    /// use cartlo_core::CartridgeRack;
    /// use cartlo_hal::Band;
    ///
    /// let mut rack = CartridgeRack::new();
    /// if let Some(cart) = rack.get_mut(Band::new(6).unwrap()) {
    ///     cart.set_observing(true).unwrap();
    /// }
    /// ```
    pub fn get_mut(&mut self, band: Band) -> Option<&mut CartAssembly> {
        self.carts.get_mut(&band)
    }

    pub fn bands(&self) -> Vec<Band> {
        self.carts.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.carts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.carts.is_empty()
    }

    /// Band of the observing cartridge, if any.
    pub fn observer(&self) -> Option<Band> {
        self.carts
            .values()
            .find(|cart| cart.is_observing())
            .map(CartAssembly::band)
    }

    /// Make `band` the only observing cartridge.
    ///
    /// The target must be installed and on; it is checked before the
    /// previous observer is cleared.
    pub fn set_observing(&mut self, band: Band) -> LoResult<()> {
        match self.carts.get(&band) {
            None => {
                return Err(LoError::InvalidArgument(format!("{} not installed", band)));
            }
            Some(cart) if !cart.is_enabled() => {
                return Err(LoError::NotEnabled(UnitKind::Cartridge));
            }
            Some(_) => {}
        }

        for (other, cart) in self.carts.iter_mut() {
            if *other != band && cart.is_observing() {
                cart.set_observing(false)?;
                info!(band = %other, "Observing cleared");
            }
        }
        match self.carts.get_mut(&band) {
            Some(cart) => cart.set_observing(true),
            None => Err(LoError::InvalidArgument(format!("{} not installed", band))),
        }
    }

    /// Leave no cartridge observing.
    pub fn clear_observing(&mut self) -> LoResult<()> {
        for cart in self.carts.values_mut() {
            cart.set_observing(false)?;
        }
        Ok(())
    }
}
