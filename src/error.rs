use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Broker error: {0}")]
    Broker(#[from] ErrorCode),
    #[error("Consumer is not subscribed to any topic")]
    NotSubscribed,
    #[error("Consumer is already subscribed, leave the group first")]
    AlreadySubscribed,
    #[error("Invalid consumer config: {0}")]
    Config(String),
}

/// Raw value of an [`ErrorCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnknownCode(i32);

macro_rules! error_codes {
    ($($(#[$meta:meta])* $name:ident = $code:literal => $desc:literal,)+) => {
        /// Error codes reported by the broker client, either through the error callback,
        /// attached to a polled message, or returned from assign/commit calls.
        ///
        /// Negative values are client-local conditions, positive values come from the broker.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ErrorCode {
            $($(#[$meta])* $name,)+
            /// Any code this crate does not reason about. Only built by
            /// [`ErrorCode::from_code`], so a known code never ends up here.
            Other(UnknownCode),
        }

        impl ErrorCode {
            pub fn code(&self) -> i32 {
                match self {
                    $(ErrorCode::$name => $code,)+
                    ErrorCode::Other(UnknownCode(code)) => *code,
                }
            }

            pub fn from_code(code: i32) -> Self {
                match code {
                    $($code => ErrorCode::$name,)+
                    other => ErrorCode::Other(UnknownCode(other)),
                }
            }

            fn description(&self) -> &'static str {
                match self {
                    $(ErrorCode::$name => $desc,)+
                    ErrorCode::Other(_) => "Unknown error",
                }
            }
        }
    };
}

error_codes! {
    BadMessage = -199 => "Local: Bad message format",
    Destroy = -197 => "Local: Broker handle destroyed",
    Fail = -196 => "Local: Communication failure with broker",
    Transport = -195 => "Local: Broker transport failure",
    Resolve = -193 => "Local: Host resolution failure",
    MessageTimedOut = -192 => "Local: Message timed out",
    PartitionEof = -191 => "Broker: No more messages",
    UnknownPartition = -190 => "Local: Unknown partition",
    UnknownTopic = -188 => "Local: Unknown topic",
    AllBrokersDown = -187 => "Local: All broker connections are down",
    InvalidArgument = -186 => "Local: Invalid argument or configuration",
    TimedOut = -185 => "Local: Timed out",
    Ssl = -181 => "Local: SSL error",
    WaitCoordinator = -180 => "Local: Waiting for coordinator",
    UnknownGroup = -179 => "Local: Unknown group",
    InProgress = -178 => "Local: Operation in progress",
    /// Rebalance callback reason: partitions are being assigned.
    AssignPartitions = -175 => "Local: Assign partitions",
    /// Rebalance callback reason: partitions are being revoked.
    RevokePartitions = -174 => "Local: Revoke partitions",
    Conflict = -173 => "Local: Conflicting use",
    State = -172 => "Local: Erroneous state",
    Authentication = -169 => "Local: Authentication failure",
    NoOffset = -168 => "Local: No offset stored",
    Fatal = -150 => "Local: Fatal error",
    OffsetOutOfRange = 1 => "Broker: Offset out of range",
    UnknownTopicOrPartition = 3 => "Broker: Unknown topic or partition",
    LeaderNotAvailable = 5 => "Broker: Leader not available",
    NotLeaderForPartition = 6 => "Broker: Not leader for partition",
    RequestTimedOut = 7 => "Broker: Request timed out",
    CoordinatorNotAvailable = 15 => "Broker: Coordinator not available",
    NotCoordinator = 16 => "Broker: Not coordinator",
    IllegalGeneration = 22 => "Broker: Specified group generation id is not valid",
    UnknownMemberId = 25 => "Broker: Unknown member",
    RebalanceInProgress = 27 => "Broker: Group rebalance in progress",
    TopicAuthorizationFailed = 29 => "Broker: Topic authorization failed",
    GroupAuthorizationFailed = 30 => "Broker: Group authorization failed",
}

impl ErrorCode {
    /// Connectivity failures are the ones worth alerting on: the broker client cannot
    /// reach, resolve or authenticate against the cluster at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ErrorCode::Resolve
                | ErrorCode::Transport
                | ErrorCode::Authentication
                | ErrorCode::AllBrokersDown
        )
    }

    /// Raised by the client itself, no broker took part.
    pub fn is_local(&self) -> bool {
        self.code() < 0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

impl std::error::Error for ErrorCode {}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        ErrorCode::from_code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorCode};

    #[test]
    fn connectivity_codes() {
        for code in [
            ErrorCode::Resolve,
            ErrorCode::Transport,
            ErrorCode::Authentication,
            ErrorCode::AllBrokersDown,
        ] {
            assert!(code.is_connectivity(), "{code} should be a connectivity error");
        }

        for code in [
            ErrorCode::MessageTimedOut,
            ErrorCode::RebalanceInProgress,
            ErrorCode::UnknownTopicOrPartition,
            ErrorCode::from_code(-1),
        ] {
            assert!(!code.is_connectivity(), "{code} is not a connectivity error");
        }
    }

    #[test]
    fn codes_map_back_and_forth() {
        assert_eq!(ErrorCode::from_code(-187), ErrorCode::AllBrokersDown);
        assert_eq!(ErrorCode::AllBrokersDown.code(), -187);
        assert_eq!(ErrorCode::from_code(27), ErrorCode::RebalanceInProgress);
        assert!(matches!(ErrorCode::from_code(12345), ErrorCode::Other(_)));
        assert_eq!(ErrorCode::from_code(12345).code(), 12345);
    }

    #[test]
    fn known_codes_are_never_other() {
        let code = ErrorCode::from_code(-187);
        assert!(!matches!(code, ErrorCode::Other(_)));
        assert!(code.is_connectivity());
        assert!(ErrorCode::from(-193).is_connectivity());
    }

    #[test]
    fn local_codes() {
        assert!(ErrorCode::NoOffset.is_local());
        assert!(ErrorCode::from_code(-100).is_local());
        assert!(!ErrorCode::RebalanceInProgress.is_local());
        assert!(!ErrorCode::from_code(12345).is_local());
    }

    #[test]
    fn display() {
        assert_eq!(
            ErrorCode::Transport.to_string(),
            "Local: Broker transport failure (-195)"
        );
        assert_eq!(
            Error::from(ErrorCode::Resolve).to_string(),
            "Broker error: Local: Host resolution failure (-193)"
        );
    }
}
