use anyhow::Result;
use clap::Args;

use leadbot::{Attribution, Dimension};

#[derive(Args)]
pub struct ParseArgs {
    /// Start code, e.g. yt_TH1_CL_01
    #[arg(default_value = "")]
    pub code: String,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

pub fn execute(args: ParseArgs) -> Result<()> {
    let attribution = Attribution::parse(&args.code);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&attribution)?);
        return Ok(());
    }

    for dimension in Dimension::ALL {
        println!("{}={}", dimension.as_str(), attribution.get(dimension));
    }
    if let Some(key) = attribution.lead_key() {
        println!("lead_key={key}");
    }
    Ok(())
}
