mod tests_tagging;
