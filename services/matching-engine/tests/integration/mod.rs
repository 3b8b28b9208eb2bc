mod order_workflow_tests;
mod recovery_tests;
