//! Energy and authorization primitives shared by message bodies.

/// Energy transfer mode the EVCC selects from the SECC's offered set
/// (spec §4.6, must match one previously offered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnergyTransferMode {
    AcSinglePhase,
    AcThreePhase,
    DcExtended,
    DcCombo,
    DcUnique,
}

/// Authorization/payment method (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentMethod {
    /// External Identification Means (RFID, app, off-band).
    Eim,
    /// Plug-and-Charge (contract-certificate based).
    PnC,
}

/// An energy quantity with explicit unit and decimal multiplier, encoded
/// bit-exact on the wire (spec §4.1). `value * 10^multiplier` is the
/// physical quantity in the base unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Power {
    pub value: i32,
    pub multiplier: i8,
}

impl Power {
    pub const fn new(value: i32, multiplier: i8) -> Self {
        Power { value, multiplier }
    }

    /// The physical quantity as a floating point value in the base unit.
    pub fn as_f64(self) -> f64 {
        f64::from(self.value) * 10f64.powi(i32::from(self.multiplier))
    }
}
