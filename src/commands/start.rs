use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use leadbot::responder::{MembershipStatus, Reply, Responder};

use super::open_bot;

#[derive(Args)]
pub struct StartArgs {
    #[arg(allow_hyphen_values = true)]
    pub user_id: i64,

    #[arg(allow_hyphen_values = true)]
    pub chat_id: i64,

    /// Start code carried by the deep link
    #[arg(default_value = "")]
    pub code: String,

    /// Continue with the subscription check, treating the user as having
    /// this channel membership (member, left, ...)
    #[arg(long, value_parser = parse_membership)]
    pub membership: Option<MembershipStatus>,
}

pub fn execute(config_path: Option<PathBuf>, args: StartArgs) -> Result<()> {
    let bot = open_bot(config_path)?;
    let responder = Responder::new(&bot);

    print_reply(&responder.handle_start(args.user_id, args.chat_id, &args.code));

    let Some(status) = args.membership else {
        return Ok(());
    };
    let membership = move |_: &str, _: i64| -> leadbot::Result<MembershipStatus> { Ok(status) };
    let reply = responder.handle_check_subscription(args.user_id, &membership);
    print_reply(&reply);

    if let Reply::SendLead { .. } = reply {
        print_reply(&responder.confirm_delivery(args.user_id));
    }
    Ok(())
}

fn print_reply(reply: &Reply) {
    match reply {
        Reply::Welcome { text, channel_link } | Reply::SubscribeFirst { text, channel_link } => {
            println!("{text}\n{channel_link}");
        }
        Reply::FileUnavailable { text } | Reply::DeliveryFailed { text } => println!("{text}"),
        Reply::SendLead {
            path, status_text, ..
        } => println!("{status_text}\nfile={}", path.display()),
        Reply::CourseOffer { text, links } => {
            println!(
                "{text}\nfree={}\nbase={}\npro={}",
                links.free, links.base, links.pro
            );
        }
        Reply::Acknowledged => {}
    }
}

fn parse_membership(raw: &str) -> Result<MembershipStatus, String> {
    MembershipStatus::parse(raw).ok_or_else(|| format!("unknown membership status '{raw}'"))
}
