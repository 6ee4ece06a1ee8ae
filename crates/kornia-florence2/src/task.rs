//! Florence-2 task tokens and their natural-language instructions.
//!
//! The model is steered by a task token such as `<CAPTION>` or `<OD>`. Eight of the tasks take no
//! extra input and are translated to a fixed instruction before tokenization. The remaining tasks
//! carry a region (as location tokens) or a free-text phrase.

use crate::error::Florence2Error;

/// What a task needs besides the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskInput {
    None,
    /// A region encoded as `<loc_x1><loc_y1><loc_x2><loc_y2>`.
    Region,
    /// A caption, phrase or referring expression.
    Text,
}

/// The shape of the decoded output of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutput {
    Text,
    /// A label followed by one or more groups of four location tokens.
    LabeledBoxes,
    /// A label followed by eight location tokens.
    QuadBoxes,
    /// Location tokens read as polygon vertices, polygons separated by `<sep>`.
    Polygons,
    /// A label followed by a `<poly>...</poly>` block, falling back to boxes.
    LabeledPolygons,
}

/// The tasks understood by Florence-2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Florence2Task {
    Caption,
    DetailedCaption,
    MoreDetailedCaption,
    ObjectDetection,
    Ocr,
    OcrWithRegion,
    DenseRegionCaption,
    RegionProposal,
    RegionToDescription,
    RegionToSegmentation,
    RegionToCategory,
    RegionToOcr,
    CaptionToPhraseGrounding,
    ReferringExpressionSegmentation,
    OpenVocabularyDetection,
}

impl Florence2Task {
    pub const ALL: [Florence2Task; 15] = [
        Florence2Task::Caption,
        Florence2Task::DetailedCaption,
        Florence2Task::MoreDetailedCaption,
        Florence2Task::ObjectDetection,
        Florence2Task::Ocr,
        Florence2Task::OcrWithRegion,
        Florence2Task::DenseRegionCaption,
        Florence2Task::RegionProposal,
        Florence2Task::RegionToDescription,
        Florence2Task::RegionToSegmentation,
        Florence2Task::RegionToCategory,
        Florence2Task::RegionToOcr,
        Florence2Task::CaptionToPhraseGrounding,
        Florence2Task::ReferringExpressionSegmentation,
        Florence2Task::OpenVocabularyDetection,
    ];

    /// The task token, e.g. `<CAPTION>`.
    pub fn token(&self) -> &'static str {
        match self {
            Florence2Task::Caption => "<CAPTION>",
            Florence2Task::DetailedCaption => "<DETAILED_CAPTION>",
            Florence2Task::MoreDetailedCaption => "<MORE_DETAILED_CAPTION>",
            Florence2Task::ObjectDetection => "<OD>",
            Florence2Task::Ocr => "<OCR>",
            Florence2Task::OcrWithRegion => "<OCR_WITH_REGION>",
            Florence2Task::DenseRegionCaption => "<DENSE_REGION_CAPTION>",
            Florence2Task::RegionProposal => "<REGION_PROPOSAL>",
            Florence2Task::RegionToDescription => "<REGION_TO_DESCRIPTION>",
            Florence2Task::RegionToSegmentation => "<REGION_TO_SEGMENTATION>",
            Florence2Task::RegionToCategory => "<REGION_TO_CATEGORY>",
            Florence2Task::RegionToOcr => "<REGION_TO_OCR>",
            Florence2Task::CaptionToPhraseGrounding => "<CAPTION_TO_PHRASE_GROUNDING>",
            Florence2Task::ReferringExpressionSegmentation => {
                "<REFERRING_EXPRESSION_SEGMENTATION>"
            }
            Florence2Task::OpenVocabularyDetection => "<OPEN_VOCABULARY_DETECTION>",
        }
    }

    /// The fixed instruction of a task that takes no input.
    pub fn instruction(&self) -> Option<&'static str> {
        let instruction = match self {
            Florence2Task::Caption => "What does the image describe?",
            Florence2Task::DetailedCaption => "Describe in detail what is shown in the image.",
            Florence2Task::MoreDetailedCaption => {
                "Describe with a paragraph what is shown in the image."
            }
            Florence2Task::ObjectDetection => "Locate the objects with category name in the image.",
            Florence2Task::Ocr => "What is the text in the image?",
            Florence2Task::OcrWithRegion => "What is the text in the image, with regions?",
            Florence2Task::DenseRegionCaption => {
                "Locate the objects in the image, with their descriptions."
            }
            Florence2Task::RegionProposal => "Locate the region proposals in the image.",
            _ => return None,
        };
        Some(instruction)
    }

    pub fn input(&self) -> TaskInput {
        match self {
            Florence2Task::RegionToDescription
            | Florence2Task::RegionToSegmentation
            | Florence2Task::RegionToCategory
            | Florence2Task::RegionToOcr => TaskInput::Region,
            Florence2Task::CaptionToPhraseGrounding
            | Florence2Task::ReferringExpressionSegmentation
            | Florence2Task::OpenVocabularyDetection => TaskInput::Text,
            _ => TaskInput::None,
        }
    }

    pub fn output(&self) -> TaskOutput {
        match self {
            Florence2Task::ObjectDetection
            | Florence2Task::DenseRegionCaption
            | Florence2Task::RegionProposal
            | Florence2Task::CaptionToPhraseGrounding => TaskOutput::LabeledBoxes,
            Florence2Task::OcrWithRegion => TaskOutput::QuadBoxes,
            Florence2Task::RegionToSegmentation
            | Florence2Task::ReferringExpressionSegmentation => TaskOutput::Polygons,
            Florence2Task::OpenVocabularyDetection => TaskOutput::LabeledPolygons,
            _ => TaskOutput::Text,
        }
    }

    /// Look up a task by its exact token.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|task| task.token() == token)
    }

    /// Detect the task a prompt starts with.
    pub fn from_prompt(prompt: &str) -> Option<Self> {
        // `<OCR>` is not a prefix of `<OCR_WITH_REGION>` thanks to the closing bracket
        Self::ALL
            .into_iter()
            .find(|task| prompt.starts_with(task.token()))
    }

    /// Build the instruction sent to the tokenizer.
    ///
    /// Tasks without input ignore `input` and return their fixed instruction. Region tasks expect
    /// location tokens, text tasks expect a phrase.
    ///
    /// # Errors
    ///
    /// Returns [`Florence2Error::MissingTaskInput`] if the task needs an input and none is given.
    pub fn build_prompt(&self, input: Option<&str>) -> Result<String, Florence2Error> {
        if let Some(instruction) = self.instruction() {
            return Ok(instruction.to_string());
        }

        let input = input
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(Florence2Error::MissingTaskInput(self.token()))?;

        let prompt = match self {
            Florence2Task::RegionToDescription => format!("What does the region {input} describe?"),
            Florence2Task::RegionToSegmentation => {
                format!("What is the polygon mask of region {input}")
            }
            Florence2Task::RegionToCategory => format!("What is the region {input}?"),
            Florence2Task::RegionToOcr => format!("What text is in the region {input}?"),
            Florence2Task::CaptionToPhraseGrounding => {
                format!("Locate the phrases in the caption: {input}")
            }
            Florence2Task::ReferringExpressionSegmentation => {
                format!("Locate {input} in the image with mask")
            }
            Florence2Task::OpenVocabularyDetection => format!("Locate {input} in the image."),
            _ => input.to_string(),
        };

        Ok(prompt)
    }
}

impl std::fmt::Display for Florence2Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Translate a task token into its instruction.
///
/// Only the exact tokens of the eight input-free tasks are translated. Anything else, including
/// input-taking task tokens and free-form questions, is returned unchanged.
pub fn resolve_task_prompt(prompt: &str) -> &str {
    match Florence2Task::from_token(prompt).and_then(|task| task.instruction()) {
        Some(instruction) => instruction,
        None => prompt,
    }
}
