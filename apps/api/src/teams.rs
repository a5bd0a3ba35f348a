//! Team ownership resolution.
//!
//! Documents and public links created by a team member belong to the team
//! admin, who pays for the team. The owner is always resolved here from the
//! broker's own team row, never taken from request input.

use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::auth::jwt::Claims;
use crate::errors::AppError;

/// The broker id that owns resources created by `claims`.
pub async fn resolve_owner_id(pool: &PgPool, claims: &Claims) -> Result<Uuid, AppError> {
    let Some(team_id) = claims.team_id.filter(|_| claims.is_team_member) else {
        return Ok(claims.sub);
    };

    let admin: Option<Option<Uuid>> =
        sqlx::query_scalar("SELECT admin_broker_id FROM teams WHERE id = $1")
            .bind(team_id)
            .fetch_optional(pool)
            .await?;

    match admin.flatten() {
        Some(admin_id) => Ok(admin_id),
        None => {
            warn!("Team {team_id} has no admin; broker {} owns its own resources", claims.sub);
            Ok(claims.sub)
        }
    }
}

/// Broker ids whose documents `claims` may read and chat with.
pub async fn visible_owner_ids(pool: &PgPool, claims: &Claims) -> Result<Vec<Uuid>, AppError> {
    let owner = resolve_owner_id(pool, claims).await?;
    Ok(owner_set(claims.sub, owner))
}

fn owner_set(broker_id: Uuid, owner_id: Uuid) -> Vec<Uuid> {
    if broker_id == owner_id {
        vec![broker_id]
    } else {
        vec![owner_id, broker_id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_set_solo_broker() {
        let id = Uuid::new_v4();
        assert_eq!(owner_set(id, id), vec![id]);
    }

    #[test]
    fn test_owner_set_team_member_includes_admin() {
        let member = Uuid::new_v4();
        let admin = Uuid::new_v4();
        assert_eq!(owner_set(member, admin), vec![admin, member]);
    }
}
