mod lifecycle_tests;
mod matching_tests;
