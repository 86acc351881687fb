//! Reads a subject's block sequence and rest calendar from storage.

use pacer_core::model::{BlockSequence, RestCalendar, StudentId, SubjectId};
use storage::repository::{BlockRepository, RestRepository};

use crate::error::LoadError;

pub(crate) async fn load_sequence(
    blocks: &dyn BlockRepository,
    subject_id: SubjectId,
) -> Result<BlockSequence, LoadError> {
    let rows = blocks.blocks_for_subject(subject_id).await?;
    Ok(BlockSequence::new(subject_id, rows)?)
}

pub(crate) async fn load_rests(
    rests: &dyn RestRepository,
    student_id: StudentId,
    subject_id: SubjectId,
) -> Result<RestCalendar, LoadError> {
    let periods = rests.rests_for(student_id, subject_id).await?;
    Ok(RestCalendar::new(periods)?)
}
