//! Role grants after a passing review.
//!
//! The assigned role and the race-derived role are granted independently.
//! Permission errors or missing roles degrade to a partial result instead
//! of failing the task.

use crate::platform::{GuildRole, Outbound, PlatformError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantStatus {
    Granted,
    /// The bot lacks permission to grant it.
    Forbidden,
    /// No guild role has this name.
    Missing,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrant {
    pub name: String,
    pub status: GrantStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantReport {
    /// The member already holds the role or the race role.
    AlreadyGranted,
    Attempted {
        role: RoleGrant,
        race: Option<RoleGrant>,
    },
}

impl GrantReport {
    pub fn fully_granted(&self) -> bool {
        match self {
            Self::AlreadyGranted => true,
            Self::Attempted { role, race } => {
                role.status == GrantStatus::Granted
                    && race.as_ref().is_none_or(|r| r.status == GrantStatus::Granted)
            }
        }
    }

    /// Suffix appended to the success message.
    pub fn summary(&self) -> String {
        match self {
            Self::AlreadyGranted => "You already have this role, nothing was changed.".into(),
            Self::Attempted { role, race } => {
                let mut parts = vec![describe("role", role)];
                if let Some(race) = race {
                    parts.push(describe("race role", race));
                }
                parts.join(" ")
            }
        }
    }
}

fn describe(kind: &str, grant: &RoleGrant) -> String {
    let name = &grant.name;
    match &grant.status {
        GrantStatus::Granted => format!("Granted {kind} `{name}`."),
        GrantStatus::Forbidden => {
            format!("Could not grant {kind} `{name}`: the bot lacks permission, please ask a moderator.")
        }
        GrantStatus::Missing => {
            format!("The {kind} `{name}` does not exist on this server, please ask a moderator.")
        }
        GrantStatus::Failed(e) => format!("Granting {kind} `{name}` failed: {e}"),
    }
}

fn find_role<'a>(roles: &'a [GuildRole], name: &str) -> Option<&'a GuildRole> {
    roles.iter().find(|r| r.name == name)
}

async fn grant_one(
    outbound: &Outbound,
    guild_id: &str,
    user_id: &str,
    name: &str,
    role: Option<&GuildRole>,
) -> RoleGrant {
    let status = match role {
        None => GrantStatus::Missing,
        Some(role) => match outbound.grant_role(guild_id, user_id, &role.id).await {
            Ok(()) => GrantStatus::Granted,
            Err(PlatformError::Forbidden(_)) => GrantStatus::Forbidden,
            Err(e) => GrantStatus::Failed(e.to_string()),
        },
    };
    if status != GrantStatus::Granted {
        tracing::warn!(guild = guild_id, user = user_id, role = name, status = ?status, "Role grant incomplete");
    }
    RoleGrant {
        name: name.to_string(),
        status,
    }
}

/// Grant `role_name` and the race role to a member. Lookup failures are
/// returned as errors; grant failures are reported in the result.
pub async fn grant_roles(
    outbound: &Outbound,
    guild_id: &str,
    user_id: &str,
    role_name: &str,
    race: &str,
) -> Result<GrantReport, PlatformError> {
    let roles = outbound.list_roles(guild_id).await?;
    let held = outbound.member_roles(guild_id, user_id).await?;

    let role = find_role(&roles, role_name);
    let race_role = (!race.is_empty()).then(|| find_role(&roles, race)).flatten();

    let holds = |r: Option<&GuildRole>| r.is_some_and(|r| held.contains(&r.id));
    if holds(role) || holds(race_role) {
        return Ok(GrantReport::AlreadyGranted);
    }

    let role = grant_one(outbound, guild_id, user_id, role_name, role).await;
    let race = if race.is_empty() {
        None
    } else {
        Some(grant_one(outbound, guild_id, user_id, race, race_role).await)
    };
    Ok(GrantReport::Attempted { role, race })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::MockPlatform;
    use crate::platform::RetryPolicy;
    use std::sync::Arc;

    fn outbound(mock: &Arc<MockPlatform>) -> Outbound {
        Outbound::new(mock.clone(), RetryPolicy::default())
    }

    #[tokio::test]
    async fn grants_role_and_race_role() {
        let mock = Arc::new(MockPlatform::with_roles(&["Student", "Human"]));
        let report = grant_roles(&outbound(&mock), "g1", "u1", "Student", "Human")
            .await
            .unwrap();
        assert!(report.fully_granted());
        assert_eq!(
            mock.grants(),
            vec![
                ("u1".to_string(), "r0".to_string()),
                ("u1".to_string(), "r1".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn existing_race_role_short_circuits() {
        let mock = Arc::new(MockPlatform::with_roles(&["Student", "Human"]));
        mock.set_member_roles("u1", &["r1"]);
        let report = grant_roles(&outbound(&mock), "g1", "u1", "Student", "Human")
            .await
            .unwrap();
        assert_eq!(report, GrantReport::AlreadyGranted);
        assert!(mock.grants().is_empty());
    }

    #[tokio::test]
    async fn forbidden_and_missing_roles_are_partial() {
        let mock = Arc::new(MockPlatform::with_roles(&["Student"]));
        mock.forbid_role("r0");
        let report = grant_roles(&outbound(&mock), "g1", "u1", "Student", "Yokai")
            .await
            .unwrap();
        assert!(!report.fully_granted());
        let GrantReport::Attempted { role, race } = &report else {
            panic!("expected an attempt");
        };
        assert_eq!(role.status, GrantStatus::Forbidden);
        assert_eq!(race.as_ref().unwrap().status, GrantStatus::Missing);
        let text = report.summary();
        assert!(text.contains("lacks permission"));
        assert!(text.contains("does not exist"));
    }
}
