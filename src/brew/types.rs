use serde::{Deserialize, Serialize};

/// Brewing method of a recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrewMethod {
  Espresso,
  PourOver,
  FrenchPress,
  AeroPress,
  ColdBrew,
  MokaPot,
}

/// A recipe as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
  pub id: String,
  pub name: String,
  pub method: BrewMethod,
  pub coffee_grams: f32,
  pub water_grams: f32,
  pub grind_size: String,
  pub notes: Option<String>,
  #[serde(default)]
  pub average_rating: Option<f32>,
}

/// A new recipe submitted by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRecipe {
  pub name: String,
  pub method: BrewMethod,
  pub coffee_grams: f32,
  pub water_grams: f32,
  pub grind_size: String,
  pub notes: Option<String>,
}

/// A user's rating of a coffee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateCoffee {
  pub coffee_id: String,
  /// 1 to 5 stars
  pub stars: u8,
  pub comment: Option<String>,
}
