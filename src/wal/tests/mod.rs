mod helpers;
mod tests_durability;
