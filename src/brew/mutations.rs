//! Queue routing for brew writes.

use crate::queue::Mutation;

use super::types::{CreateRecipe, RateCoffee};

impl Mutation for CreateRecipe {
  fn mutation_type() -> &'static str {
    "recipes:create"
  }
}

impl Mutation for RateCoffee {
  fn mutation_type() -> &'static str {
    "coffee:rate"
  }
}
