pub mod token_cost;
