use crate::aspect::AspectRatio;
use crate::error::StudioError;
use crate::image_data::ImageData;
use crate::modes::StudioMode;

pub const DEFAULT_INTENSITY: f64 = 0.5;

/// Everything a backend needs for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPayload {
    pub mode: StudioMode,
    pub source: ImageData,
    pub reference: Option<ImageData>,
    pub instruction: String,
    pub aspect_ratio: AspectRatio,
}

impl RequestPayload {
    /// Images in the order the instruction refers to them.
    pub fn images(&self) -> impl Iterator<Item = &ImageData> {
        std::iter::once(&self.source).chain(self.reference.iter())
    }
}

pub fn build_request(
    mode: StudioMode,
    source: &ImageData,
    reference: Option<&ImageData>,
    annotation: &str,
    intensity: f64,
    aspect_ratio: AspectRatio,
) -> Result<RequestPayload, StudioError> {
    let reference = if mode.requires_reference() {
        Some(reference.ok_or(StudioError::MissingReference)?.clone())
    } else {
        None
    };
    let instruction = assemble_instruction(
        mode,
        annotation,
        normalize_intensity(intensity),
        aspect_ratio,
    );
    Ok(RequestPayload {
        mode,
        source: source.clone(),
        reference,
        instruction,
        aspect_ratio,
    })
}

pub fn normalize_intensity(intensity: f64) -> f64 {
    if intensity.is_nan() {
        return DEFAULT_INTENSITY;
    }
    intensity.clamp(0.0, 1.0)
}

fn intensity_label(intensity: f64) -> &'static str {
    if intensity < 0.34 {
        "subtle"
    } else if intensity < 0.67 {
        "balanced"
    } else {
        "bold"
    }
}

fn assemble_instruction(
    mode: StudioMode,
    annotation: &str,
    intensity: f64,
    aspect_ratio: AspectRatio,
) -> String {
    let body = match mode {
        StudioMode::Derive => {
            "Task: material derivation and structural redesign.\n\
             1. Study the visual DNA of the uploaded image: materials, color palette, lighting and rendering style.\n\
             2. Create a brand-new object or design that shares exactly that visual style.\n\
             3. Change its physical shape and structure so it reads as a new product or character from the same brand or universe.\n\
             4. Keep cinematic detail and crisp 4K-grade rendering."
        }
        StudioMode::Transfer => {
            "Task: cross-image style transfer. Apply the material and art style of image 2 to the object in image 1.\n\
             1. Preserve the core structure, silhouette and functional features of the object in image 1.\n\
             2. Extract the material textures, lighting environment and color scheme of image 2.\n\
             3. Wrap the shell of image 2 seamlessly around the skeleton of image 1.\n\
             4. Never alter the base shape of image 1."
        }
        StudioMode::Refine => {
            "Task: ultra high definition industrial refinement.\n\
             1. Apply professional post-render enhancement to this sketch or low-fidelity image.\n\
             2. Never change the object's basic shape, composition or colors.\n\
             3. Add micro detail: brushed metal, physically accurate reflections, ambient occlusion and sharp edges.\n\
             4. Match the output of a high-end offline 3D renderer at commercial release quality."
        }
    };

    let mut text = String::from(body);
    text.push_str(&format!(
        "\nTransformation intensity: {:.0}% ({}).",
        intensity * 100.0,
        intensity_label(intensity)
    ));
    let annotation = annotation.trim();
    if !annotation.is_empty() {
        text.push_str("\nAdditional notes: ");
        text.push_str(annotation);
    }
    text.push_str(&format!(
        "\nThe result must strictly follow the {aspect_ratio} aspect ratio."
    ));
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(tag: u8) -> ImageData {
        ImageData::new("image/png", vec![tag; 4])
    }

    #[test]
    fn transfer_without_reference_fails() {
        let result = build_request(
            StudioMode::Transfer,
            &image(1),
            None,
            "",
            0.5,
            AspectRatio::Square,
        );
        assert!(matches!(result, Err(StudioError::MissingReference)));
    }

    #[test]
    fn transfer_carries_reference_after_source() -> Result<(), StudioError> {
        let payload = build_request(
            StudioMode::Transfer,
            &image(1),
            Some(&image(2)),
            "liquid chrome",
            0.9,
            AspectRatio::Wide,
        )?;
        let tags: Vec<u8> = payload.images().map(|item| item.bytes[0]).collect();
        assert_eq!(tags, vec![1, 2]);
        assert!(payload.instruction.contains("Additional notes: liquid chrome"));
        assert!(payload.instruction.contains("90% (bold)"));
        assert!(payload.instruction.ends_with("follow the 16:9 aspect ratio."));
        Ok(())
    }

    #[test]
    fn derive_and_refine_ignore_reference() -> Result<(), StudioError> {
        for mode in [StudioMode::Derive, StudioMode::Refine] {
            let payload = build_request(
                mode,
                &image(1),
                Some(&image(2)),
                "",
                0.2,
                AspectRatio::Portrait,
            )?;
            assert!(payload.reference.is_none());
            assert_eq!(payload.images().count(), 1);
            assert!(!payload.instruction.contains("Additional notes"));
        }
        Ok(())
    }

    #[test]
    fn intensity_is_clamped() {
        assert_eq!(normalize_intensity(-1.0), 0.0);
        assert_eq!(normalize_intensity(3.0), 1.0);
        assert_eq!(normalize_intensity(f64::NAN), DEFAULT_INTENSITY);
    }
}
