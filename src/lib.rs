//! クイズしよう！ (Kuizushiyō!): a timed trivia quiz.

pub mod libkuizu;
