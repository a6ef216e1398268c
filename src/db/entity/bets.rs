use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "bets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub round_id: Uuid,
    #[sea_orm(indexed)]
    pub user_id: Uuid,
    pub nick: String,
    /// Hundredths of a credit.
    pub amount: i64,
    pub auto_cashout: Option<f64>,
    pub cashed_out_at: Option<f64>,
    pub payout: i64,
    pub settled_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
