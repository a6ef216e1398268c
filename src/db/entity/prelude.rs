pub use super::bets::Entity as Bets;
pub use super::rounds::Entity as Rounds;
