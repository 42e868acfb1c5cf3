//! Numeric replies the bouncer reacts to

/// IRC numeric reply codes consumed by a network session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NumericReply {
    // Connection registration
    RplWelcome = 1,

    // Away and WHOIS
    RplAway = 301,
    RplWhoisUser = 311,
    RplWhoisServer = 312,
    RplWhoisOperator = 313,
    RplWhoisIdle = 317,
    RplEndOfWhois = 318,
    RplWhoisChannels = 319,
    /// Secure connection notice used by older ircds
    RplWhoisSecureLegacy = 617,
    RplWhoisSecure = 671,

    // Channel listing
    RplList = 322,
    RplListEnd = 323,

    // Channel state
    RplChannelModeIs = 324,
    RplTopic = 332,
    RplTopicWhoTime = 333,
    RplInviting = 341,
    RplNameReply = 353,
    RplEndOfNames = 366,

    // Errors
    ErrNicknameInUse = 433,
    ErrUserOnChannel = 443,
    ErrChanOpPrivsNeeded = 482,
}

impl NumericReply {
    /// Look up a numeric by its wire code
    pub fn from_code(code: u16) -> Option<Self> {
        use NumericReply::*;
        let reply = match code {
            1 => RplWelcome,
            301 => RplAway,
            311 => RplWhoisUser,
            312 => RplWhoisServer,
            313 => RplWhoisOperator,
            317 => RplWhoisIdle,
            318 => RplEndOfWhois,
            319 => RplWhoisChannels,
            617 => RplWhoisSecureLegacy,
            671 => RplWhoisSecure,
            322 => RplList,
            323 => RplListEnd,
            324 => RplChannelModeIs,
            332 => RplTopic,
            333 => RplTopicWhoTime,
            341 => RplInviting,
            353 => RplNameReply,
            366 => RplEndOfNames,
            433 => ErrNicknameInUse,
            443 => ErrUserOnChannel,
            482 => ErrChanOpPrivsNeeded,
            _ => return None,
        };
        Some(reply)
    }

    /// Get the numeric code
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Whether this reply belongs to a WHOIS response
    pub fn is_whois(self) -> bool {
        matches!(
            self,
            NumericReply::RplWhoisUser
                | NumericReply::RplWhoisServer
                | NumericReply::RplWhoisOperator
                | NumericReply::RplWhoisIdle
                | NumericReply::RplEndOfWhois
                | NumericReply::RplWhoisChannels
                | NumericReply::RplWhoisSecureLegacy
                | NumericReply::RplWhoisSecure
        )
    }
}
