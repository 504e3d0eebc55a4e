//! Dashboard rescaling.
//!
//! A dashboard's `<size>` child declares its pixel size, while every nested
//! `<zone>` stores `x`/`y`/`w`/`h` at [`BASE_SCALE`] relative to that size.
//! Resizing rewrites the size and re-expresses every zone against the new one
//! so each zone keeps its pixel geometry:
//!
//! 1. `pixels = round_half_up(value * old / BASE_SCALE)`
//! 2. `value' = round_half_up(pixels / new * BASE_SCALE)`
//!
//! The intermediate rounding to whole pixels is part of the format contract;
//! a single-pass `value * old / new` gives different results.

use super::document::{Document, DocumentError, Element};
use super::fixed_point::{BASE_SCALE, Decimal, Ratio};

pub const DASHBOARD_TAG: &str = "dashboard";
pub const SIZE_TAG: &str = "size";
pub const ZONE_TAG: &str = "zone";

/// Outcome of [`rescale_dashboard`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescaleOutcome {
    /// A dashboard with the requested name exists
    pub dashboard_found: bool,
    /// Size before the rewrite, when the dashboard declared one
    pub old_size: Option<(Decimal, Decimal)>,
    pub zones_rescaled: usize,
}

/// Rescale one coordinate from the `old` dashboard dimension to `new`.
///
/// Returns `None` when an intermediate value overflows or `new` is zero.
pub fn rescale_coordinate(value: Decimal, old: Decimal, new: Decimal) -> Option<i128> {
    let base = Ratio::from_integer(BASE_SCALE);

    let pixels = value
        .to_ratio()
        .checked_mul(old.to_ratio())?
        .checked_div(base)?
        .round_half_up();

    let rescaled = Ratio::from_integer(pixels)
        .checked_div(new.to_ratio())?
        .checked_mul(base)?
        .round_half_up();

    Some(rescaled)
}

/// Resize the first dashboard named `name` to `new_width` × `new_height`.
///
/// The dashboard's `<size>` gets identical min/max values, making it a
/// fixed-size dashboard. Every `<zone>` below it, including those of device
/// layouts, is re-expressed against the new size. Zones outside the
/// dashboard are left untouched.
///
/// A missing dashboard, or one without a readable `<size>`, is not an error:
/// the document is left as it was and the outcome says so.
///
/// # Errors
///
/// Returns [`DocumentError::InvalidNumber`] if a zone coordinate or the old
/// size is not a plain base-10 number, or if a rescaled value overflows.
pub fn rescale_dashboard(
    document: &mut Document,
    name: &str,
    new_width: Decimal,
    new_height: Decimal,
) -> Result<RescaleOutcome, DocumentError> {
    let Some(dashboard) = document.find_element_mut(|el| {
        el.is(DASHBOARD_TAG) && matches!(el.attribute("name"), Ok(Some(ref n)) if n == name)
    }) else {
        tracing::warn!("Dashboard '{}' not found, nothing to rescale", name);
        return Ok(RescaleOutcome::default());
    };

    let mut outcome = RescaleOutcome {
        dashboard_found: true,
        ..RescaleOutcome::default()
    };

    let Some(size) = dashboard.child_mut(SIZE_TAG) else {
        tracing::warn!("Dashboard '{}' has no <size> element, nothing to rescale", name);
        return Ok(outcome);
    };

    let (Some(old_width), Some(old_height)) = (
        read_number(size, "maxwidth")?,
        read_number(size, "maxheight")?,
    ) else {
        tracing::warn!("Dashboard '{}' has no maxwidth/maxheight, nothing to rescale", name);
        return Ok(outcome);
    };

    size.set_attributes(&[
        ("maxwidth", new_width.to_string()),
        ("minwidth", new_width.to_string()),
        ("maxheight", new_height.to_string()),
        ("minheight", new_height.to_string()),
    ])?;
    outcome.old_size = Some((old_width, old_height));

    tracing::info!(
        "Resizing dashboard '{}' from {}x{} to {}x{}",
        name,
        old_width,
        old_height,
        new_width,
        new_height
    );

    let axes = [
        ("w", old_width, new_width),
        ("x", old_width, new_width),
        ("h", old_height, new_height),
        ("y", old_height, new_height),
    ];

    let mut zones = 0;
    dashboard.for_each_descendant_mut(&mut |el: &mut Element| {
        if !el.is(ZONE_TAG) {
            return Ok(());
        }

        let mut updates = Vec::with_capacity(axes.len());
        for (attribute, old, new) in axes {
            let Some(value) = read_number(el, attribute)? else {
                continue;
            };
            let rescaled = rescale_coordinate(value, old, new).ok_or_else(|| {
                DocumentError::InvalidNumber {
                    attribute: attribute.to_string(),
                    value: value.to_string(),
                }
            })?;
            updates.push((attribute, rescaled.to_string()));
        }

        if !updates.is_empty() {
            el.set_attributes(&updates)?;
        }
        zones += 1;
        Ok(())
    })?;

    tracing::debug!("Rescaled {} zones in dashboard '{}'", zones, name);
    outcome.zones_rescaled = zones;
    Ok(outcome)
}

fn read_number(el: &Element, attribute: &str) -> Result<Option<Decimal>, DocumentError> {
    el.attribute(attribute)?
        .map(|raw| {
            raw.parse::<Decimal>()
                .map_err(|_| DocumentError::InvalidNumber {
                    attribute: attribute.to_string(),
                    value: raw.clone(),
                })
        })
        .transpose()
}
