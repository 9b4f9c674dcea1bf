use super::test_helpers::*;
use super::*;
use crate::error::{Error, TaskError};
use crate::types::{Event, ItemState, NewTask, TaskAction, TaskState};
use std::sync::atomic::Ordering;
use std::time::Duration;
