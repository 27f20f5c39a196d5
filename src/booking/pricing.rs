use super::error::BookingError;

/// Share of the slot total due up front.
pub const INITIAL_PAYMENT_RATIO: f64 = 0.25;

/// One instrument add-on for pricing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AddonLine {
    pub rate_per_hour: f64,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotPrice {
    pub base: f64,
    /// Line price per add-on, in input order.
    pub addon_lines: Vec<f64>,
    pub total: f64,
    pub initial: f64,
}

fn check_rate(rate: f64, what: &str) -> Result<(), BookingError> {
    if !rate.is_finite() || rate < 0.0 {
        return Err(BookingError::InvalidPricing(format!(
            "{what} must be a non-negative number, got {rate}"
        )));
    }
    Ok(())
}

/// Price one slot: base = hourly × hours, each add-on = rate × quantity × hours,
/// total = base + add-ons, initial = total × 25%.
pub fn price_slot(hourly: f64, hours: f64, addons: &[AddonLine]) -> Result<SlotPrice, BookingError> {
    if !hours.is_finite() || hours <= 0.0 {
        return Err(BookingError::InvalidPricing(format!(
            "duration must be positive, got {hours} hours"
        )));
    }
    check_rate(hourly, "hourly price")?;
    for addon in addons {
        check_rate(addon.rate_per_hour, "instrument rate")?;
    }

    let base = hourly * hours;
    let addon_lines: Vec<f64> = addons
        .iter()
        .map(|a| a.rate_per_hour * f64::from(a.quantity) * hours)
        .collect();
    let total = base + addon_lines.iter().sum::<f64>();
    if !total.is_finite() {
        return Err(BookingError::InvalidPricing("slot total overflows".into()));
    }

    Ok(SlotPrice {
        base,
        addon_lines,
        total,
        initial: total * INITIAL_PAYMENT_RATIO,
    })
}
