//! Report cards: students joined with their grades.

use crate::config::{GRADES_TARGET, STUDENTS_TARGET};
use crate::errors::AggregatorError;
use crate::models::{
    AggregationResult, CallOutcome, CallSpec, FailureKind, Grade, Identity, ListResponse,
    ReportCard, ReportCardsResponse, Student,
};
use crate::services::aggregator::Aggregator;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

/// One card per student, in student order, each with that student's grades.
#[must_use]
pub fn merge_report_cards(students: &[Student], grades: &[Grade]) -> Vec<ReportCard> {
    let mut by_student: HashMap<i64, Vec<Grade>> = HashMap::new();
    for grade in grades {
        by_student.entry(grade.student_id).or_default().push(grade.clone());
    }

    students
        .iter()
        .map(|student| ReportCard {
            student: format!("{} {}", student.name, student.surname),
            grades: by_student.remove(&student.id).unwrap_or_default(),
        })
        .collect()
}

/// Decode a `{"result": [...]}` payload. A success whose body has the wrong
/// shape is downgraded to `Unreachable` in `result`.
fn decode_list<T: DeserializeOwned>(
    result: &mut AggregationResult,
    target: &str,
) -> Option<Vec<T>> {
    let payload = result.payload(target)?.clone();
    match serde_json::from_value::<ListResponse<T>>(payload) {
        Ok(list) => Some(list.result),
        Err(e) => {
            warn!(
                target: "aggregator.report_cards",
                service = %target,
                error = %e,
                "Downstream payload has unexpected shape"
            );
            result.insert(target.to_string(), CallOutcome::Failure(FailureKind::Unreachable));
            None
        }
    }
}

fn required_failed(target: &str, result: AggregationResult) -> AggregatorError {
    let kind = result
        .get(target)
        .and_then(CallOutcome::failure)
        .unwrap_or(FailureKind::Unreachable);
    AggregatorError::RequiredTargetFailed {
        target: target.to_string(),
        kind,
        partial: result,
    }
}

#[derive(Debug, Clone)]
pub struct ReportCardService {
    aggregator: Arc<Aggregator>,
    timeout: Duration,
    retries: u32,
    grades_required: bool,
}

impl ReportCardService {
    #[must_use]
    pub fn new(
        aggregator: Arc<Aggregator>,
        timeout: Duration,
        retries: u32,
        grades_required: bool,
    ) -> Self {
        Self {
            aggregator,
            timeout,
            retries,
            grades_required,
        }
    }

    /// Students are always required; grades only when configured.
    #[must_use]
    pub fn calls(&self) -> Vec<CallSpec> {
        vec![
            CallSpec::new(STUDENTS_TARGET, "/", self.timeout)
                .required(true)
                .with_retries(self.retries),
            CallSpec::new(GRADES_TARGET, "/", self.timeout)
                .required(self.grades_required)
                .with_retries(self.retries),
        ]
    }

    /// Fetch students and grades concurrently and merge them.
    ///
    /// # Errors
    ///
    /// `RequiredTargetFailed` when students (or grades, if required) could
    /// not be fetched or decoded.
    #[instrument(skip_all, name = "aggregator.report_cards.build")]
    pub async fn build(&self, identity: &Identity) -> Result<ReportCardsResponse, AggregatorError> {
        let mut result = self.aggregator.aggregate(identity, &self.calls()).await?;

        let students = decode_list::<Student>(&mut result, STUDENTS_TARGET);
        let grades = decode_list::<Grade>(&mut result, GRADES_TARGET);

        let Some(students) = students else {
            return Err(required_failed(STUDENTS_TARGET, result));
        };
        if grades.is_none() && self.grades_required {
            return Err(required_failed(GRADES_TARGET, result));
        }

        let report_cards = merge_report_cards(&students, grades.as_deref().unwrap_or_default());

        Ok(ReportCardsResponse {
            report_cards,
            failures: result.failures(),
        })
    }
}
