use indexmap::IndexMap;

use crate::error::StudioError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StylePreset {
    pub id: String,
    pub name: String,
    pub description: String,
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct PresetCatalog {
    presets: IndexMap<String, StylePreset>,
}

impl Default for PresetCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PresetCatalog {
    pub fn new(presets: Option<IndexMap<String, StylePreset>>) -> Self {
        Self {
            presets: presets.unwrap_or_else(default_presets),
        }
    }

    pub fn get(&self, id: &str) -> Option<&StylePreset> {
        self.presets.get(id.trim())
    }

    pub fn require(&self, id: &str) -> Result<&StylePreset, StudioError> {
        self.get(id)
            .ok_or_else(|| StudioError::UnknownPreset(id.trim().to_string()))
    }

    pub fn list(&self) -> impl Iterator<Item = &StylePreset> {
        self.presets.values()
    }

    /// Append a preset's prompt fragment to free-text annotation.
    pub fn apply(&self, id: &str, annotation: &str) -> Result<String, StudioError> {
        let preset = self.require(id)?;
        let annotation = annotation.trim();
        if annotation.is_empty() {
            return Ok(preset.prompt.clone());
        }
        Ok(format!("{annotation} {}", preset.prompt))
    }
}

fn default_presets() -> IndexMap<String, StylePreset> {
    let mut map = IndexMap::new();
    let mut insert = |id: &str, name: &str, description: &str, prompt: &str| {
        map.insert(
            id.to_string(),
            StylePreset {
                id: id.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                prompt: prompt.to_string(),
            },
        );
    };

    insert(
        "cyberpunk",
        "Cyberpunk",
        "Neon light, mechanical parts and a futuristic sheen.",
        "re-imagined in high-tech cyberpunk style, glowing neon accents, mechanical detailing, futuristic dark metal textures, synthwave aesthetics.",
    );
    insert(
        "3d-render",
        "3D Animated",
        "Soft lighting, clean surfaces and playful 3D proportions.",
        "transformed into a high-quality 3D clay render, animated feature film style, soft studio lighting, vibrant colors, matte finish, whimsical proportions.",
    );
    insert(
        "steampunk",
        "Steampunk",
        "Brass, gears and Victorian machinery.",
        "converted to steampunk machinery, brass and copper gears, steam pipes, Victorian industrial aesthetic, leather textures, sepia-toned metals.",
    );
    insert(
        "golden",
        "Royal Gold",
        "Gold leaf, jewels and sacred craftsmanship.",
        "crafted from solid gold and ivory, encrusted with glowing sapphire gems, intricate filigree, divine royal craftsmanship, shimmering reflections.",
    );
    insert(
        "sketch",
        "Master Sketch",
        "Fine pencil lines and artistic cross-hatching.",
        "rendered as a professional architectural pencil sketch, detailed cross-hatching, graphite textures, artistic shading on vintage parchment paper.",
    );
    insert(
        "mecha",
        "Mecha",
        "Heavy armor, military plating and robotic design.",
        "transformed into a heavy tactical mecha robot, military grade armor plating, hydraulic systems, industrial grey and orange safety highlights.",
    );

    map
}
