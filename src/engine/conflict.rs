use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// First confirmed/active booking in `existing` that overlaps `span`, skipping `exclude`.
pub fn find_conflict<'a>(
    existing: impl IntoIterator<Item = &'a Booking>,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    existing
        .into_iter()
        .find(|b| b.status.blocks() && Some(b.id) != exclude && b.span.overlaps(span))
        .map(|b| b.id)
}

impl Engine {
    /// Advisory read-only check. The authoritative check runs inside the repository commit.
    pub async fn has_conflict(
        &self,
        spot_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let span = Span::try_new(start, end).ok_or(EngineError::InvalidRange { start, end })?;
        let existing = self.repo.bookings_for_spot(spot_id, span).await?;
        Ok(find_conflict(&existing, &span, exclude).is_some())
    }
}
