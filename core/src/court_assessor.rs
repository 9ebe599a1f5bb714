//! Court-Defensibility Assessor (C9): scores evidence for admissibility
//! against a jurisdiction x court-type x legal-standard requirements
//! registry, and anticipates the challenges an opposing party might raise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storage::{RecordCollection, StorageBackend, StorageError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CourtAssessorError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("no requirements registered for {jurisdiction:?}/{court_type:?}")]
    NoRequirements { jurisdiction: Jurisdiction, court_type: CourtType },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Jurisdiction {
    FederalUs,
    StateUs,
    EuropeanUnion,
    UnitedKingdom,
    International,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CourtType {
    Criminal,
    Civil,
    Administrative,
    Arbitration,
    Military,
    International,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegalStandard {
    Preponderance,
    ClearAndConvincing,
    BeyondReasonableDoubt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Admissibility {
    Admissible,
    Conditional,
    UnderReview,
    Inadmissible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequirementKind {
    Relevance,
    Authentication,
    Hearsay,
    BestEvidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalRequirement {
    pub id: Uuid,
    pub jurisdiction: Jurisdiction,
    pub court_type: CourtType,
    pub kind: RequirementKind,
    pub description: String,
    pub is_mandatory: bool,
    pub precedence: u32,
}

/// Attributes of a piece of evidence the assessor evaluates each
/// requirement against. Populated from the evidence vault item and the
/// case's investigative record.
#[derive(Debug, Clone, Default)]
pub struct EvidenceAttributes {
    pub has_unbroken_custody_chain: bool,
    pub custody_chain_verified: bool,
    pub hearsay_exception_applies: bool,
    pub is_original: bool,
    pub relevant_to_case: bool,
}

fn requirement_met(kind: RequirementKind, attrs: &EvidenceAttributes) -> bool {
    match kind {
        RequirementKind::Relevance => attrs.relevant_to_case,
        RequirementKind::Authentication => attrs.has_unbroken_custody_chain && attrs.custody_chain_verified,
        RequirementKind::Hearsay => attrs.hearsay_exception_applies,
        RequirementKind::BestEvidence => attrs.is_original,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalChallenge {
    pub challenge_type: RequirementKind,
    pub description: String,
    pub severity: ChallengeSeverity,
    pub likelihood: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourtComplianceRecord {
    pub id: Uuid,
    pub evidence_id: Uuid,
    pub case_id: Uuid,
    pub jurisdiction: Jurisdiction,
    pub court_type: CourtType,
    pub legal_standard: LegalStandard,
    pub requirements_met: Vec<RequirementKind>,
    pub requirements_missing: Vec<RequirementKind>,
    pub relevance_score: f64,
    pub reliability_score: f64,
    pub compliance_score: f64,
    pub admissibility: Admissibility,
    pub challenges: Vec<LegalChallenge>,
    pub assessed_at: DateTime<Utc>,
}

pub struct CourtComplianceAssessor<T: StorageBackend> {
    requirements: Vec<LegalRequirement>,
    records: RecordCollection<T>,
}

impl<T: StorageBackend> CourtComplianceAssessor<T> {
    pub fn new(backend: T) -> Self {
        CourtComplianceAssessor { requirements: default_requirements(), records: RecordCollection::new(backend, "court_compliance:") }
    }

    pub fn register_requirement(&mut self, requirement: LegalRequirement) {
        self.requirements.push(requirement);
        self.requirements.sort_by_key(|r| std::cmp::Reverse(r.precedence));
    }

    /// Assess evidence for admissibility, per §4.6: requirements
    /// fulfilment (70%) + relevance (15%) + reliability (15%), mapped to
    /// a verdict at the 90/70/50 thresholds.
    pub async fn assess(
        &self,
        case_id: Uuid,
        evidence_id: Uuid,
        jurisdiction: Jurisdiction,
        court_type: CourtType,
        legal_standard: LegalStandard,
        attrs: &EvidenceAttributes,
        reliability_score: f64,
    ) -> Result<CourtComplianceRecord, CourtAssessorError> {
        let applicable: Vec<&LegalRequirement> = self
            .requirements
            .iter()
            .filter(|r| r.jurisdiction == jurisdiction && r.court_type == court_type)
            .collect();
        if applicable.is_empty() {
            return Err(CourtAssessorError::NoRequirements { jurisdiction, court_type });
        }

        let mut met = Vec::new();
        let mut missing = Vec::new();
        for req in &applicable {
            if requirement_met(req.kind, attrs) {
                met.push(req.kind);
            } else {
                missing.push(req.kind);
            }
        }

        let met_ratio = met.len() as f64 / applicable.len() as f64;
        let relevance_score = if attrs.relevant_to_case { 1.0 } else { 0.2 };
        let compliance_score = (met_ratio * 70.0 + relevance_score * 15.0 + reliability_score * 15.0).min(100.0);

        let admissibility = if compliance_score >= 90.0 {
            Admissibility::Admissible
        } else if compliance_score >= 70.0 {
            Admissibility::Conditional
        } else if compliance_score >= 50.0 {
            Admissibility::UnderReview
        } else {
            Admissibility::Inadmissible
        };

        let challenges = missing
            .iter()
            .filter_map(|kind| {
                applicable.iter().find(|r| r.kind == *kind).map(|req| LegalChallenge {
                    challenge_type: *kind,
                    description: req.description.clone(),
                    severity: if req.is_mandatory { ChallengeSeverity::High } else { ChallengeSeverity::Medium },
                    likelihood: if req.is_mandatory { 0.7 } else { 0.3 },
                })
            })
            .collect();

        let record = CourtComplianceRecord {
            id: Uuid::new_v4(),
            evidence_id,
            case_id,
            jurisdiction,
            court_type,
            legal_standard,
            requirements_met: met,
            requirements_missing: missing,
            relevance_score,
            reliability_score,
            compliance_score,
            admissibility,
            challenges,
            assessed_at: Utc::now(),
        };

        self.records.put(&record.id, &record).await?;
        Ok(record)
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<CourtComplianceRecord>, CourtAssessorError> {
        Ok(self.records.get(id).await?)
    }
}

/// The Federal-US/Criminal baseline requirement set: relevance,
/// authentication, hearsay, best-evidence, in precedence order.
fn default_requirements() -> Vec<LegalRequirement> {
    vec![
        LegalRequirement {
            id: Uuid::new_v4(),
            jurisdiction: Jurisdiction::FederalUs,
            court_type: CourtType::Criminal,
            kind: RequirementKind::Relevance,
            description: "Evidence must be relevant to the case".to_string(),
            is_mandatory: true,
            precedence: 1,
        },
        LegalRequirement {
            id: Uuid::new_v4(),
            jurisdiction: Jurisdiction::FederalUs,
            court_type: CourtType::Criminal,
            kind: RequirementKind::Authentication,
            description: "Evidence must be properly authenticated via an unbroken, verified chain of custody".to_string(),
            is_mandatory: true,
            precedence: 2,
        },
        LegalRequirement {
            id: Uuid::new_v4(),
            jurisdiction: Jurisdiction::FederalUs,
            court_type: CourtType::Criminal,
            kind: RequirementKind::Hearsay,
            description: "Hearsay evidence must fall under a recognised exception".to_string(),
            is_mandatory: true,
            precedence: 3,
        },
        LegalRequirement {
            id: Uuid::new_v4(),
            jurisdiction: Jurisdiction::FederalUs,
            court_type: CourtType::Criminal,
            kind: RequirementKind::BestEvidence,
            description: "Original evidence preferred over copies".to_string(),
            is_mandatory: false,
            precedence: 4,
        },
    ]
}
