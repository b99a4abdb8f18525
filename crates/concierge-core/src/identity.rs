//! Authenticated identities and staff availability.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::ids::{AdminId, StaffId, UserId};

/// The role a connection authenticated as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// An end user seeking support.
    User,
    /// A support staff member.
    Staff,
    /// An administrator.
    Admin,
}

impl Role {
    /// Returns the lowercase wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Staff => "staff",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "staff" => Ok(Self::Staff),
            "admin" => Ok(Self::Admin),
            other => Err(CoreError::UnknownVariant {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// A verified `(role, id)` pair.
///
/// Produced by the authentication layer; the routing core never constructs one from
/// client-supplied data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "lowercase")]
pub enum Identity {
    /// An authenticated end user.
    User(UserId),
    /// An authenticated staff member.
    Staff(StaffId),
    /// An authenticated administrator.
    Admin(AdminId),
}

impl Identity {
    /// Build an identity from a role and a raw numeric id.
    #[must_use]
    pub const fn from_parts(role: Role, id: u64) -> Self {
        match role {
            Role::User => Self::User(UserId::new(id)),
            Role::Staff => Self::Staff(StaffId::new(id)),
            Role::Admin => Self::Admin(AdminId::new(id)),
        }
    }

    /// The role of this identity.
    #[must_use]
    pub const fn role(&self) -> Role {
        match self {
            Self::User(_) => Role::User,
            Self::Staff(_) => Role::Staff,
            Self::Admin(_) => Role::Admin,
        }
    }

    /// The raw numeric id, without its role.
    #[must_use]
    pub const fn raw_id(&self) -> u64 {
        match self {
            Self::User(id) => id.get(),
            Self::Staff(id) => id.get(),
            Self::Admin(id) => id.get(),
        }
    }

    /// Returns the user id if this is a user identity.
    #[must_use]
    pub const fn as_user(&self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the staff id if this is a staff identity.
    #[must_use]
    pub const fn as_staff(&self) -> Option<StaffId> {
        match self {
            Self::Staff(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns `true` for administrator identities.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self, Self::Admin(_))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role(), self.raw_id())
    }
}

impl From<UserId> for Identity {
    fn from(id: UserId) -> Self {
        Self::User(id)
    }
}

impl From<StaffId> for Identity {
    fn from(id: StaffId) -> Self {
        Self::Staff(id)
    }
}

impl From<AdminId> for Identity {
    fn from(id: AdminId) -> Self {
        Self::Admin(id)
    }
}

/// Availability of a staff member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum StaffStatus {
    /// Connected and accepting new consultations.
    Online = 1,
    /// Connected, but only reachable through explicit targeting.
    Busy = 2,
    /// Not reachable.
    Offline = 3,
}

impl StaffStatus {
    /// Convert the status to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to a `StaffStatus`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Online),
            2 => Some(Self::Busy),
            3 => Some(Self::Offline),
            _ => None,
        }
    }

    /// Whether this staff member may be named as an explicit or transfer target.
    #[must_use]
    pub const fn is_reachable(self) -> bool {
        matches!(self, Self::Online | Self::Busy)
    }

    /// Whether this staff member may receive automatic assignments.
    #[must_use]
    pub const fn is_assignable(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for StaffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Online => "online",
            Self::Busy => "busy",
            Self::Offline => "offline",
        })
    }
}

impl FromStr for StaffStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "busy" => Ok(Self::Busy),
            "offline" => Ok(Self::Offline),
            other => Err(CoreError::UnknownVariant {
                kind: "staff status",
                value: other.to_string(),
            }),
        }
    }
}
