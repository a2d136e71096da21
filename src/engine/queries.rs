use ulid::Ulid;

use crate::model::*;
use crate::rewards::{calculate_level, level_progress};

use super::{Engine, EngineError};

impl Engine {
    pub async fn booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.load_booking(id).await
    }

    /// Bookings on the spot overlapping `[start, end)`, any status, by start time.
    pub async fn spot_schedule(
        &self,
        spot_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<Booking>, EngineError> {
        let window = Span::try_new(start, end).ok_or(EngineError::InvalidRange { start, end })?;
        Ok(self.repo.bookings_for_spot(spot_id, window).await?)
    }

    pub async fn bookings_for_user(&self, user_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        Ok(self.repo.bookings_for_user(user_id).await?)
    }

    pub async fn active_sanctions(&self, unit_id: Ulid) -> Result<Vec<Sanction>, EngineError> {
        let mut sanctions = self.repo.sanctions_for_unit(unit_id).await?;
        sanctions.retain(|s| s.is_active);
        Ok(sanctions)
    }

    pub async fn infractions(&self, condominium_id: Ulid) -> Result<Vec<InfractionReport>, EngineError> {
        Ok(self.repo.infractions_for_condominium(condominium_id).await?)
    }

    pub async fn level_summary(&self, user_id: Ulid) -> Result<LevelSummary, EngineError> {
        let total_xp = self.repo.xp_total(user_id).await?;
        let level = calculate_level(total_xp);
        Ok(LevelSummary {
            user_id,
            total_xp,
            level,
            progress: level_progress(total_xp, level),
        })
    }
}
