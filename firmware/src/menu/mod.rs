//! Engine steps for the menus.

mod main_menu;
mod settings;
mod wallet_menu;

pub use main_menu::MainMenu;
pub use settings::SettingsMenu;
pub use wallet_menu::WalletMenu;
