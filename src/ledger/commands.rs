//! Slash commands understood by the bot.

use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Family expense bot commands:")]
pub enum Command {
    #[command(description = "show the main menu")]
    Start,
    #[command(description = "show this help")]
    Help,
    #[command(description = "log an expense")]
    Add,
    #[command(description = "view statistics")]
    Stats,
    #[command(description = "abandon the current dialog")]
    Cancel,
    #[command(description = "same as /cancel")]
    Stop,
    #[command(description = "register under a name: /register Lisa")]
    Register(String),
    #[command(description = "reload categories from the Config sheet")]
    Reloadcats,
}
