mod tests_filter;
mod tests_format;
