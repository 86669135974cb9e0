mod mock_platform;
mod simulation;
