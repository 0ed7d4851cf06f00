mod test_call_page_join;
