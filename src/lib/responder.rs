//! Conversation flow of the bot, independent of the chat transport.
//!
//! Handlers record what happened through [`LeadBot`] and return a [`Reply`]
//! for the transport to render. Storage failures are logged and never turn
//! into a user-visible error; the only failure the user sees is a fixed
//! message when a lead file is unavailable or could not be sent.

use std::path::PathBuf;

use tracing::warn;

use crate::{
    attribution::Attribution,
    config::CourseLinks,
    error::{LeadError, Result},
    event_log::EventTag,
    service::LeadBot,
    users::UserUpdate,
};

pub const WELCOME_TEXT: &str = "Hi! You are in the right place for practical guides on keeping \
business accounts safe from blocking.\n\nStep 1. Subscribe to the channel.\nStep 2. Press \
\"I'm subscribed, send the file\".";
pub const SUBSCRIBE_FIRST_TEXT: &str = "It looks like you are not subscribed to the channel yet.\n\n\
Please subscribe to get the materials, then press \"I'm subscribed, send the file\" again.";
pub const FILE_UNAVAILABLE_TEXT: &str = "Subscription confirmed.\n\nThere is no file configured \
for this topic, format and creative yet. Please contact the author directly.";
pub const SENDING_TEXT: &str = "Subscription confirmed. Sending your file...";
pub const LEAD_CAPTION: &str = "Your lead magnet. Save it and put it to work.";
pub const COURSE_OFFER_TEXT: &str = "Want to go further than putting out the fire? Take the \
course and build your business so the bank never sees it as risky.\n\nPick a format below.";
pub const DELIVERY_FAILED_TEXT: &str = "Something went wrong while sending the file.\n\
Please try again later or contact the author.";

const NO_FILE_EXTRA: &str = "no_file";

/// Channel membership states as reported by the chat platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

impl MembershipStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "creator" | "owner" => Some(Self::Creator),
            "administrator" => Some(Self::Administrator),
            "member" => Some(Self::Member),
            "restricted" => Some(Self::Restricted),
            "left" => Some(Self::Left),
            "kicked" | "banned" => Some(Self::Kicked),
            _ => None,
        }
    }

    pub fn is_subscribed(self) -> bool {
        matches!(self, Self::Creator | Self::Administrator | Self::Member)
    }
}

/// Channel-membership lookup provided by the chat transport.
pub trait MembershipCheck {
    fn membership(&self, channel: &str, user_id: i64) -> Result<MembershipStatus>;
}

impl<F> MembershipCheck for F
where
    F: Fn(&str, i64) -> Result<MembershipStatus>,
{
    fn membership(&self, channel: &str, user_id: i64) -> Result<MembershipStatus> {
        self(channel, user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Welcome {
        text: &'static str,
        channel_link: String,
    },
    SubscribeFirst {
        text: &'static str,
        channel_link: String,
    },
    FileUnavailable {
        text: &'static str,
    },
    /// The transport should show `status_text`, send `path` with `caption`
    /// and then call [`Responder::confirm_delivery`] or
    /// [`Responder::report_delivery_failure`].
    SendLead {
        path: PathBuf,
        status_text: &'static str,
        caption: &'static str,
    },
    CourseOffer {
        text: &'static str,
        links: CourseLinks,
    },
    DeliveryFailed {
        text: &'static str,
    },
    Acknowledged,
}

pub struct Responder<'a> {
    bot: &'a LeadBot,
}

impl<'a> Responder<'a> {
    pub fn new(bot: &'a LeadBot) -> Self {
        Self { bot }
    }

    /// `/start <code>`: remember where the user came from and greet them.
    pub fn handle_start(&self, user_id: i64, chat_id: i64, code: &str) -> Reply {
        let user_key = user_id.to_string();
        let attribution = Attribution::parse(code);

        let update = UserUpdate::from_attribution(&attribution).with_chat_id(chat_id);
        if let Err(err) = self.bot.update_user(&user_key, &update) {
            log_write_failure("update user", &user_key, &err);
        }
        self.record(&user_key, EventTag::Start, &attribution, "");

        Reply::Welcome {
            text: WELCOME_TEXT,
            channel_link: self.bot.config().channel_link(),
        }
    }

    /// "I'm subscribed" button: verify membership, then look up the file for
    /// the user's stored attribution.
    pub fn handle_check_subscription(&self, user_id: i64, members: &dyn MembershipCheck) -> Reply {
        let channel = self.bot.config().channel_id.as_str();
        let subscribed = match members.membership(channel, user_id) {
            Ok(status) => status.is_subscribed(),
            Err(err) => {
                warn!(
                    target: "leadbot.responder",
                    "membership lookup for {} in {} failed: {}",
                    user_id,
                    channel,
                    err
                );
                false
            }
        };
        if !subscribed {
            return Reply::SubscribeFirst {
                text: SUBSCRIBE_FIRST_TEXT,
                channel_link: self.bot.config().channel_link(),
            };
        }

        let user_key = user_id.to_string();
        let attribution = self.bot.users().get(&user_key).attribution();
        match self.bot.catalog().resolve(&attribution) {
            Some(path) => Reply::SendLead {
                path,
                status_text: SENDING_TEXT,
                caption: LEAD_CAPTION,
            },
            None => {
                self.record(
                    &user_key,
                    EventTag::LeadFileNotFound,
                    &attribution,
                    NO_FILE_EXTRA,
                );
                Reply::FileUnavailable {
                    text: FILE_UNAVAILABLE_TEXT,
                }
            }
        }
    }

    /// The transport sent the lead file: log it, flag the user and offer
    /// the course.
    pub fn confirm_delivery(&self, user_id: i64) -> Reply {
        let user_key = user_id.to_string();
        let attribution = self.bot.users().get(&user_key).attribution();
        let extra = format!("lead_type={}", attribution.lead_type);
        self.record(&user_key, EventTag::LeadSent, &attribution, &extra);
        if let Err(err) = self.bot.update_user(&user_key, &UserUpdate::lead_sent()) {
            log_write_failure("flag lead", &user_key, &err);
        }

        Reply::CourseOffer {
            text: COURSE_OFFER_TEXT,
            links: self.bot.config().course_links(),
        }
    }

    pub fn report_delivery_failure(&self, user_id: i64, reason: &str) -> Reply {
        let user_key = user_id.to_string();
        let attribution = self.bot.users().get(&user_key).attribution();
        warn!(
            target: "leadbot.responder",
            "failed to deliver lead to {}: {}",
            user_key,
            reason
        );
        self.record(&user_key, EventTag::LeadSendFailed, &attribution, reason);
        Reply::DeliveryFailed {
            text: DELIVERY_FAILED_TEXT,
        }
    }

    pub fn handle_button_click(&self, user_id: i64, data: &str) -> Reply {
        self.record(
            &user_id.to_string(),
            EventTag::ButtonClick,
            &Attribution::default(),
            data,
        );
        Reply::Acknowledged
    }

    fn record(&self, user_key: &str, event: EventTag, attribution: &Attribution, extra: &str) {
        if let Err(err) = self
            .bot
            .record_interaction(user_key, event, attribution, extra)
        {
            log_write_failure("log event", user_key, &err);
        }
    }
}

fn log_write_failure(action: &str, user_key: &str, err: &LeadError) {
    warn!(
        target: "leadbot.responder",
        "failed to {} for {}: {}",
        action,
        user_key,
        err
    );
}
