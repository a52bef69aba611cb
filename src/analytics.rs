//! Validation summary of the deployed classifier.
//!
//! Static figures from the model's held-out evaluation run; the service does
//! not expose them, so they ship with the console.

#[derive(Debug, Clone)]
pub struct ClassRecall {
    pub name: &'static str,
    pub recall: f32,
}

#[derive(Debug, Clone)]
pub struct ModelCard {
    pub model_id: &'static str,
    pub dataset_size: u32,
    pub accuracy: f32,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
    pub classes: Vec<ClassRecall>,
}

pub fn model_card() -> ModelCard {
    ModelCard {
        model_id: "CNN-2026-02-18",
        dataset_size: 656,
        accuracy: 0.86,
        precision: 0.86,
        recall: 0.86,
        f1: 0.86,
        classes: vec![
            ClassRecall { name: "Pituitary", recall: 0.97 },
            ClassRecall { name: "No Tumor", recall: 0.91 },
            ClassRecall { name: "Meningioma", recall: 0.84 },
            ClassRecall { name: "Glioma", recall: 0.70 },
        ],
    }
}

impl ModelCard {
    /// Class the model most often misses.
    pub fn weakest_class(&self) -> Option<&ClassRecall> {
        self.classes
            .iter()
            .min_by(|a, b| a.recall.total_cmp(&b.recall))
    }
}

/// Whole-number percentage, e.g. `0.97` → `"97%"`.
pub fn percent(value: f32) -> String {
    format!("{:.0}%", value * 100.0)
}
