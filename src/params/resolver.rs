//! Parameter resolver: option bag plus configuration to backend-ready values

use std::io::Cursor;

use tracing::debug;

use super::capability::{self, BackendKind, DEFAULT_NAI_MODEL};
use super::{GenerationOptions, ResolvedParameters, Size, SourceImage, ORIENTATIONS};
use crate::config::{ParamConfig, Settings};
use crate::error::ValidationError;

/// Enhance only accepts sources whose sides add up to this value
pub const ENHANCE_CALIBRATION: u32 = 1280;

const ENHANCE_STRENGTH: f64 = 0.2;
const ENHANCE_NOISE: f64 = 0.0;

/// Pixel budget for sizes derived from a source image
const MAX_DERIVED_PIXELS: u64 = 1024 * 1024;

/// Resolve the effective generation parameters for `kind`
pub fn resolve(
    options: &GenerationOptions,
    source_image: Option<SourceImage>,
    settings: &Settings,
    kind: BackendKind,
) -> Result<ResolvedParameters, ValidationError> {
    let params = &settings.params;
    let features = &settings.features;
    let restricted = kind.is_metered() && !features.allow_credit && !options.privileged;
    let multiple = kind.resolution_multiple();

    match (&source_image, options.enhance) {
        (None, true) => return Err(ValidationError::ExpectImage),
        (None, false) if !features.text => return Err(ValidationError::FeatureDisabled("text")),
        (Some(_), _) if !features.image => return Err(ValidationError::FeatureDisabled("image")),
        _ => {}
    }
    if options.enhance && restricted {
        return Err(ValidationError::UnpermittedOverride("enhance"));
    }

    let model = resolve_model(
        options.model.as_deref().or(settings.backend.model.as_deref()),
        kind,
    )?;
    let sampler_key = resolve_sampler(
        options.sampler.as_deref(),
        settings.backend.sampler.as_deref(),
        kind,
        model.as_deref(),
    );

    let explicit_steps = match options.steps {
        Some(_) if restricted => return Err(ValidationError::UnpermittedOverride("steps")),
        Some(steps) => Some(validate_steps(steps, params.max_steps)?),
        None => None,
    };
    let explicit_size = match options.resolution.as_deref() {
        Some(source) => Some(parse_resolution(source, multiple, params.max_resolution, restricted)?),
        None => None,
    };

    let strength = check_unit("strength", options.strength)?;
    let noise = check_unit("noise", options.noise)?;
    let scale = options.scale.unwrap_or(params.scale);
    if !scale.is_finite() || scale <= 0.0 {
        return Err(ValidationError::OutOfRange { field: "scale", value: scale });
    }

    let (size, steps, strength, noise) = match &source_image {
        None => {
            let size = match explicit_size {
                Some(size) => size,
                None => default_resolution(params, multiple)?,
            };
            (size, explicit_steps.unwrap_or(params.text_steps), None, None)
        }
        Some(image) if options.enhance => {
            let source = image_size(&image.bytes)?;
            if source.width + source.height != ENHANCE_CALIBRATION {
                return Err(ValidationError::InvalidImageSize {
                    width: source.width,
                    height: source.height,
                });
            }
            let size = Size {
                width: closest_multiple(source.width * 3 / 2, multiple),
                height: closest_multiple(source.height * 3 / 2, multiple),
            };
            (
                size,
                explicit_steps.unwrap_or(params.text_steps),
                Some(strength.unwrap_or(ENHANCE_STRENGTH)),
                Some(noise.unwrap_or(ENHANCE_NOISE)),
            )
        }
        Some(image) => {
            let size = match explicit_size {
                Some(size) => size,
                None => resize_input(image_size(&image.bytes)?, multiple),
            };
            (
                size,
                explicit_steps.unwrap_or(params.image_steps),
                Some(strength.unwrap_or(params.strength)),
                Some(noise.unwrap_or(params.noise)),
            )
        }
    };

    let steps = match params.max_steps {
        0 => steps.max(1),
        max => steps.clamp(1, max),
    };
    let seed = options.seed.unwrap_or_else(rand::random::<u32>);

    debug!(
        backend = %kind,
        seed = seed,
        width = size.width,
        height = size.height,
        steps = steps,
        sampler = %sampler_key,
        "Resolved generation parameters"
    );

    Ok(ResolvedParameters {
        seed,
        width: size.width,
        height: size.height,
        steps,
        scale,
        sampler_key,
        model,
        strength,
        noise,
        source_image,
        enhance: options.enhance,
    })
}

fn resolve_model(requested: Option<&str>, kind: BackendKind) -> Result<Option<String>, ValidationError> {
    match kind {
        BackendKind::NovelAi => {
            let name = requested.unwrap_or(DEFAULT_NAI_MODEL);
            capability::nai_model_id(name)
                .map(|id| Some(id.to_string()))
                .ok_or_else(|| ValidationError::UnknownModel(name.to_string()))
        }
        _ => Ok(requested.map(str::to_string)),
    }
}

fn resolve_sampler(
    requested: Option<&str>,
    configured: Option<&str>,
    kind: BackendKind,
    model: Option<&str>,
) -> String {
    let table = capability::sampler_table(kind, model);
    [requested, configured]
        .into_iter()
        .flatten()
        .find(|key| capability::lookup(table, key).is_some())
        .unwrap_or_else(|| kind.fallback_sampler())
        .to_string()
}

/// Steps must be a positive integer within the ceiling (zero disables it)
pub fn validate_steps(steps: i64, max_steps: u32) -> Result<u32, ValidationError> {
    let within = steps > 0 && (max_steps == 0 || steps <= i64::from(max_steps));
    match u32::try_from(steps) {
        Ok(value) if within => Ok(value),
        _ => Err(ValidationError::InvalidSteps(steps)),
    }
}

/// Parse a caller-supplied resolution: orientation name or `WxH`
pub fn parse_resolution(
    source: &str,
    multiple: u32,
    max_resolution: u32,
    restricted: bool,
) -> Result<Size, ValidationError> {
    if let Some(size) = orientation(source) {
        return Ok(size);
    }
    if restricted {
        return Err(ValidationError::UnpermittedOverride("resolution"));
    }

    let (width, height) =
        split_dimensions(source).ok_or_else(|| ValidationError::InvalidResolution(source.to_string()))?;
    // A side past the ceiling by more than half a multiple cannot round back under it
    let slack = u64::from(multiple / 2);
    if max_resolution > 0 && u64::from(width.max(height)) > u64::from(max_resolution) + slack {
        return Err(ValidationError::ResolutionTooLarge {
            width,
            height,
            max: max_resolution,
        });
    }
    let width = closest_multiple(width, multiple);
    let height = closest_multiple(height, multiple);
    if max_resolution > 0 && width.max(height) > max_resolution {
        return Err(ValidationError::ResolutionTooLarge {
            width,
            height,
            max: max_resolution,
        });
    }
    Ok(Size { width, height })
}

fn default_resolution(params: &ParamConfig, multiple: u32) -> Result<Size, ValidationError> {
    if let Some(size) = orientation(&params.resolution) {
        return Ok(size);
    }
    let (width, height) = split_dimensions(&params.resolution)
        .ok_or_else(|| ValidationError::InvalidResolution(params.resolution.clone()))?;
    Ok(Size {
        width: closest_multiple(width, multiple),
        height: closest_multiple(height, multiple),
    })
}

fn orientation(name: &str) -> Option<Size> {
    ORIENTATIONS
        .iter()
        .find(|(key, _)| *key == name.trim())
        .map(|(_, size)| *size)
}

fn split_dimensions(source: &str) -> Option<(u32, u32)> {
    let (width, height) = source.trim().split_once(['x', '×'])?;
    let parse = |part: &str| {
        if !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()) {
            part.parse::<u32>().ok()
        } else {
            None
        }
    };
    Some((parse(width)?, parse(height)?))
}

fn check_unit(field: &'static str, value: Option<f64>) -> Result<Option<f64>, ValidationError> {
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => Err(ValidationError::OutOfRange { field, value: v }),
        other => Ok(other),
    }
}

/// Nearest multiple of `multiple`, ties rounding up, never zero.
///
/// Sides near `u32::MAX` fall back to the largest multiple that fits.
pub fn closest_multiple(value: u32, multiple: u32) -> u32 {
    if multiple == 0 {
        return value.max(1);
    }
    let (value, step) = (u64::from(value), u64::from(multiple));
    let floor = value / step * step;
    let rounded = if value == floor {
        value
    } else {
        let ceil = floor + step;
        if value - floor < ceil - value {
            floor
        } else {
            ceil
        }
    };
    match u32::try_from(rounded) {
        Ok(0) => multiple,
        Ok(rounded) => rounded,
        Err(_) => u32::try_from(floor).unwrap_or(u32::MAX),
    }
}

/// Derive a generation size from a source image.
///
/// Aligned sizes within the pixel budget are kept; otherwise the short side
/// becomes 512, and failing that the long side becomes 1024.
pub fn resize_input(size: Size, multiple: u32) -> Size {
    let pixels = |s: Size| u64::from(s.width) * u64::from(s.height);
    if size.width % multiple == 0 && size.height % multiple == 0 && pixels(size) <= MAX_DERIVED_PIXELS {
        return size;
    }

    let ratio = f64::from(size.width) / f64::from(size.height);
    let scaled = |side: f64| closest_multiple(side.round() as u32, multiple);

    let short_side = if ratio > 1.0 {
        Size { width: scaled(512.0 * ratio), height: 512 }
    } else {
        Size { width: 512, height: scaled(512.0 / ratio) }
    };
    if pixels(short_side) <= MAX_DERIVED_PIXELS {
        return short_side;
    }

    if ratio > 1.0 {
        Size { width: 1024, height: scaled(1024.0 / ratio) }
    } else {
        Size { width: scaled(1024.0 * ratio), height: 1024 }
    }
}

/// Read pixel dimensions from an encoded image header
pub fn image_size(bytes: &[u8]) -> Result<Size, ValidationError> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ValidationError::UnreadableImage(e.to_string()))?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| ValidationError::UnreadableImage(e.to_string()))?;
    if width == 0 || height == 0 {
        return Err(ValidationError::UnreadableImage("empty image".to_string()));
    }
    Ok(Size { width, height })
}
