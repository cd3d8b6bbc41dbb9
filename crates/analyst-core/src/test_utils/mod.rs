pub mod mock_llm_server;
