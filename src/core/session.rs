use crate::common::{IdCaptureError, Result, ValidationIssue};
use crate::core::compressor::CompressedImage;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Identifier of the subject being verified. Used inside storage paths, so it
/// is restricted to a filesystem-safe alphabet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= 128
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
        if !valid {
            return Err(IdCaptureError::Config(format!("Invalid subject id: {:?}", id)));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SubjectId {
    type Error = IdCaptureError;

    fn try_from(value: String) -> Result<Self> {
        SubjectId::new(value)
    }
}

impl From<SubjectId> for String {
    fn from(id: SubjectId) -> String {
        id.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Passport,
    DriversLicense,
    IdCard,
}

impl DocumentType {
    pub const ALL: [DocumentType; 3] =
        [DocumentType::Passport, DocumentType::DriversLicense, DocumentType::IdCard];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Passport => "passport",
            DocumentType::DriversLicense => "drivers_license",
            DocumentType::IdCard => "id_card",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "passport" => Ok(DocumentType::Passport),
            "drivers_license" | "driver_license" | "license" => Ok(DocumentType::DriversLicense),
            "id_card" | "id" | "national_id" => Ok(DocumentType::IdCard),
            other => Err(format!("unknown document type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consent {
    NameMatches,
    ImagesClear,
    CornersVisible,
}

impl Consent {
    pub const ALL: [Consent; 3] = [Consent::NameMatches, Consent::ImagesClear, Consent::CornersVisible];

    pub fn description(&self) -> &'static str {
        match self {
            Consent::NameMatches => "the name matches the document exactly",
            Consent::ImagesClear => "both photos are clear and readable",
            Consent::CornersVisible => "all four corners of the document are visible",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Consents {
    pub name_matches: bool,
    pub images_clear: bool,
    pub corners_visible: bool,
}

impl Consents {
    pub fn all_given() -> Self {
        Self { name_matches: true, images_clear: true, corners_visible: true }
    }

    pub fn get(&self, consent: Consent) -> bool {
        match consent {
            Consent::NameMatches => self.name_matches,
            Consent::ImagesClear => self.images_clear,
            Consent::CornersVisible => self.corners_visible,
        }
    }

    pub fn set(&mut self, consent: Consent, value: bool) {
        match consent {
            Consent::NameMatches => self.name_matches = value,
            Consent::ImagesClear => self.images_clear = value,
            Consent::CornersVisible => self.corners_visible = value,
        }
    }

    pub fn first_missing(&self) -> Option<Consent> {
        Consent::ALL.into_iter().find(|c| !self.get(*c))
    }
}

/// A compressed photo held by the session: upload bytes plus a small preview.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub bytes: Arc<[u8]>,
    pub preview: Arc<DynamicImage>,
    pub width: u32,
    pub height: u32,
}

impl From<CompressedImage> for CapturedImage {
    fn from(image: CompressedImage) -> Self {
        Self {
            bytes: Arc::from(image.bytes),
            preview: Arc::new(image.preview),
            width: image.width,
            height: image.height,
        }
    }
}

impl CapturedImage {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Cross-step data for one verification attempt. Lives only as long as the
/// capture flow that created it.
#[derive(Debug, Clone, Default)]
pub struct CaptureSession {
    pub legal_name: String,
    pub country: String,
    pub document_type: Option<DocumentType>,
    pub document_image: Option<CapturedImage>,
    pub selfie_image: Option<CapturedImage>,
    pub consents: Consents,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn legal_name_is_complete(&self) -> bool {
        legal_name_is_complete(&self.legal_name)
    }

    /// Name, country and document type.
    pub fn check_details(&self) -> std::result::Result<(), ValidationIssue> {
        if !self.legal_name_is_complete() {
            return Err(ValidationIssue::LegalNameIncomplete);
        }
        if self.country.trim().is_empty() {
            return Err(ValidationIssue::CountryMissing);
        }
        if self.document_type.is_none() {
            return Err(ValidationIssue::DocumentTypeMissing);
        }
        Ok(())
    }

    pub fn check_ready_to_submit(&self) -> std::result::Result<(), ValidationIssue> {
        self.check_details()?;
        if self.document_image.is_none() {
            return Err(ValidationIssue::DocumentImageMissing);
        }
        if self.selfie_image.is_none() {
            return Err(ValidationIssue::SelfieImageMissing);
        }
        if let Some(missing) = self.consents.first_missing() {
            return Err(ValidationIssue::ConsentMissing(missing));
        }
        Ok(())
    }
}

/// At least two whitespace-separated tokens.
pub fn legal_name_is_complete(name: &str) -> bool {
    name.split_whitespace().count() >= 2
}
