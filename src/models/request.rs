use crate::services::fixed_point::Decimal;
use crate::services::resize::ResizeError;
use camino::{Utf8Path, Utf8PathBuf};

/// A validated resize request
///
/// Width and height are kept as exact decimals and are always positive, so
/// the rescaler can divide by them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeRequest {
    pub workbook: Utf8PathBuf,
    pub dashboard: String,
    pub width: Decimal,
    pub height: Decimal,
}

impl ResizeRequest {
    /// Build a request from caller-supplied text.
    ///
    /// # Errors
    ///
    /// Returns [`ResizeError::InvalidDimension`] if `width` or `height` is
    /// blank, not a plain base-10 number, zero, or negative.
    pub fn new(
        workbook: impl AsRef<Utf8Path>,
        dashboard: impl Into<String>,
        width: &str,
        height: &str,
    ) -> Result<Self, ResizeError> {
        Ok(Self {
            workbook: workbook.as_ref().to_path_buf(),
            dashboard: dashboard.into(),
            width: parse_dimension(width)?,
            height: parse_dimension(height)?,
        })
    }
}

fn parse_dimension(raw: &str) -> Result<Decimal, ResizeError> {
    let value: Decimal = raw.parse().map_err(|e| ResizeError::InvalidDimension {
        value: raw.to_string(),
        reason: format!("{}", e),
    })?;

    if !value.is_positive() {
        return Err(ResizeError::InvalidDimension {
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
