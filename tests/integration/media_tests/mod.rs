mod test_acquire_release;
