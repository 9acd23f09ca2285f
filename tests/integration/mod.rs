mod conf_store_tests;
