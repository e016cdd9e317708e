mod bootstrap_tests;
