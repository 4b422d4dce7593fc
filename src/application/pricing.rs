//! Distance and fee calculation.
//!
//! Everything here is pure: same inputs, same quote, no I/O.

use crate::domain::order::VehicleType;
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;
use serde::Serialize;

pub const EARTH_RADIUS_KM: f64 = 6371.0;
/// Weight above which the per-kg surcharge applies.
pub const SURCHARGE_THRESHOLD_KG: Decimal = dec!(50);
pub const COD_FEE_RATE: Decimal = dec!(0.01);
pub const COD_FEE_CAP: Decimal = dec!(50000);
const FEE_ROUNDING: Decimal = dec!(1000);

/// Per-vehicle price list in VND.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tariff {
    pub base_fee: Decimal,
    pub per_km: Decimal,
    pub max_weight: Decimal,
    pub surcharge_per_kg: Decimal,
}

pub fn tariff(vehicle: VehicleType) -> Tariff {
    let (base_fee, per_km, max_weight, surcharge_per_kg) = match vehicle {
        VehicleType::Bike => (dec!(15000), dec!(3000), dec!(30), dec!(0)),
        VehicleType::Car => (dec!(30000), dec!(5000), dec!(300), dec!(500)),
        VehicleType::Van => (dec!(50000), dec!(7000), dec!(500), dec!(400)),
        VehicleType::Truck500kg => (dec!(80000), dec!(10000), dec!(500), dec!(300)),
        VehicleType::Truck1000kg => (dec!(120000), dec!(15000), dec!(1000), dec!(200)),
    };
    Tariff {
        base_fee,
        per_km,
        max_weight,
        surcharge_per_kg,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeBreakdown {
    pub base_fee: Decimal,
    pub distance_fee: Decimal,
    pub weight_surcharge: Decimal,
    pub cod_fee: Decimal,
    pub shipping_fee: Decimal,
    pub total_amount: Decimal,
}

/// Great-circle distance in km, rounded to 2 decimal places.
pub fn distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> Decimal {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    Decimal::from_f64(EARTH_RADIUS_KM * c)
        .unwrap_or(Decimal::ZERO)
        .round_dp(2)
}

/// Prices a trip.
///
/// Fails with `Validation` when the weight exceeds what `vehicle` can carry
/// or any input is out of range.
pub fn quote(
    distance_km: Decimal,
    weight: Decimal,
    vehicle: VehicleType,
    cod_amount: Decimal,
) -> Result<FeeBreakdown> {
    if distance_km < Decimal::ZERO {
        return Err(EngineError::Validation(
            "distance must not be negative".to_string(),
        ));
    }
    if weight <= Decimal::ZERO {
        return Err(EngineError::Validation(
            "weight must be greater than 0".to_string(),
        ));
    }
    if cod_amount < Decimal::ZERO {
        return Err(EngineError::Validation(
            "cod_amount must not be negative".to_string(),
        ));
    }

    let tariff = tariff(vehicle);
    if weight > tariff.max_weight {
        return Err(EngineError::Validation(format!(
            "Invalid weight: {} carries at most {} kg, got {} kg",
            vehicle, tariff.max_weight, weight
        )));
    }

    let distance_fee = distance_km * tariff.per_km;
    let weight_surcharge =
        (weight - SURCHARGE_THRESHOLD_KG).max(Decimal::ZERO) * tariff.surcharge_per_kg;
    let cod_fee = (cod_amount * COD_FEE_RATE).min(COD_FEE_CAP);
    let raw = tariff.base_fee + distance_fee + weight_surcharge + cod_fee;
    let shipping_fee = (raw / FEE_ROUNDING).ceil() * FEE_ROUNDING;

    Ok(FeeBreakdown {
        base_fee: tariff.base_fee,
        distance_fee,
        weight_surcharge,
        cod_fee,
        shipping_fee,
        total_amount: shipping_fee + cod_amount,
    })
}

/// Smallest vehicle class that can carry `weight` kg.
pub fn suggest_vehicle(weight: Decimal) -> VehicleType {
    if weight <= dec!(30) {
        VehicleType::Bike
    } else if weight <= dec!(300) {
        VehicleType::Car
    } else if weight <= dec!(500) {
        VehicleType::Van
    } else {
        VehicleType::Truck1000kg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_between_districts() {
        assert_eq!(distance_km(10.7329, 106.7173, 10.8231, 106.7575), dec!(10.95));
        assert_eq!(distance_km(10.7329, 106.7173, 10.7329, 106.7173), Decimal::ZERO);
        assert_eq!(distance_km(21.0285, 105.8542, 10.8231, 106.6297), dec!(1137.80));
    }

    #[test]
    fn test_bike_quote_with_cod() {
        let fee = quote(dec!(8.5), dec!(5.5), VehicleType::Bike, dec!(500000)).unwrap();
        assert_eq!(fee.base_fee, dec!(15000));
        assert_eq!(fee.distance_fee, dec!(25500));
        assert_eq!(fee.weight_surcharge, Decimal::ZERO);
        assert_eq!(fee.cod_fee, dec!(5000));
        assert_eq!(fee.shipping_fee, dec!(46000));
        assert_eq!(fee.total_amount, dec!(546000));
    }

    #[test]
    fn test_surcharge_applies_only_above_threshold() {
        let light = quote(dec!(10), dec!(50), VehicleType::Car, Decimal::ZERO).unwrap();
        assert_eq!(light.weight_surcharge, Decimal::ZERO);
        assert_eq!(light.shipping_fee, dec!(80000));

        let heavy = quote(dec!(10), dec!(60), VehicleType::Car, Decimal::ZERO).unwrap();
        assert_eq!(heavy.weight_surcharge, dec!(5000));
        assert_eq!(heavy.shipping_fee, dec!(85000));
    }

    #[test]
    fn test_cod_fee_is_capped() {
        let fee = quote(dec!(1), dec!(1), VehicleType::Bike, dec!(10000000)).unwrap();
        assert_eq!(fee.cod_fee, COD_FEE_CAP);
        assert_eq!(fee.total_amount, fee.shipping_fee + dec!(10000000));
    }

    #[test]
    fn test_overweight_is_rejected() {
        let err = quote(dec!(5), dec!(31), VehicleType::Bike, Decimal::ZERO).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(quote(dec!(5), dec!(1000), VehicleType::Truck1000kg, Decimal::ZERO).is_ok());
    }

    #[test]
    fn test_shipping_fee_is_monotonic() {
        for vehicle in VehicleType::ALL {
            let max = tariff(vehicle).max_weight;
            let mut previous = Decimal::ZERO;
            for km in 0..60 {
                let fee = quote(Decimal::from(km) / dec!(2), dec!(1), vehicle, Decimal::ZERO)
                    .unwrap()
                    .shipping_fee;
                assert!(fee >= previous);
                previous = fee;
            }
            let mut previous = Decimal::ZERO;
            let mut weight = dec!(50);
            while weight <= max {
                let fee = quote(dec!(7.25), weight, vehicle, dec!(100000)).unwrap().shipping_fee;
                assert!(fee >= previous);
                previous = fee;
                weight += dec!(12.5);
            }
        }
    }

    #[test]
    fn test_fee_is_rounded_up_to_thousand() {
        let fee = quote(dec!(0.01), dec!(1), VehicleType::Bike, Decimal::ZERO).unwrap();
        assert_eq!(fee.shipping_fee, dec!(16000));
        let exact = quote(Decimal::ZERO, dec!(1), VehicleType::Bike, Decimal::ZERO).unwrap();
        assert_eq!(exact.shipping_fee, dec!(15000));
    }

    #[test]
    fn test_suggest_vehicle() {
        assert_eq!(suggest_vehicle(dec!(30)), VehicleType::Bike);
        assert_eq!(suggest_vehicle(dec!(30.5)), VehicleType::Car);
        assert_eq!(suggest_vehicle(dec!(500)), VehicleType::Van);
        assert_eq!(suggest_vehicle(dec!(800)), VehicleType::Truck1000kg);
    }
}
