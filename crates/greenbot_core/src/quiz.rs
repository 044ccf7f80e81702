//! crates/greenbot_core/src/quiz.rs
//!
//! Pure quiz grading. Question banks live with the display layer; this
//! module only scores submitted answers and picks a feedback tier.

use crate::domain::QuizAnswer;

/// The outcome of grading one quiz submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizScore {
    pub correct: i32,
    pub total: i32,
    pub percentage: i32,
}

/// Grades a set of answers. `percentage = round(correct / total * 100)`;
/// an empty submission scores zero.
pub fn grade(answers: &[QuizAnswer]) -> QuizScore {
    let total = answers.len() as i32;
    let correct = answers.iter().filter(|a| a.is_correct).count() as i32;
    let percentage = if total == 0 {
        0
    } else {
        ((correct as f64 / total as f64) * 100.0).round() as i32
    };
    QuizScore {
        correct,
        total,
        percentage,
    }
}

/// Marks each answer correct where the selected index matches the expected
/// one, then grades the lot.
pub fn mark(answers: &mut [QuizAnswer]) -> QuizScore {
    for answer in answers.iter_mut() {
        answer.is_correct = answer.selected_answer == answer.correct_answer;
    }
    grade(answers)
}

/// Feedback message for a score percentage.
pub fn feedback(percentage: i32) -> &'static str {
    if percentage >= 90 {
        "Excellent! You're a sustainability expert!"
    } else if percentage >= 70 {
        "Great job! You know your stuff!"
    } else if percentage >= 50 {
        "Good effort! There's always more to learn."
    } else {
        "Keep learning! Sustainability is a journey."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(selected: i32, correct: i32) -> QuizAnswer {
        QuizAnswer {
            question_id: format!("q{selected}"),
            selected_answer: selected,
            correct_answer: correct,
            is_correct: false,
        }
    }

    #[test]
    fn mark_scores_and_rounds_percentage() {
        let mut answers = vec![answer(0, 0), answer(1, 2), answer(3, 3)];
        let score = mark(&mut answers);
        assert_eq!(score.correct, 2);
        assert_eq!(score.total, 3);
        assert_eq!(score.percentage, 67);
        assert!(answers[0].is_correct);
        assert!(!answers[1].is_correct);
    }

    #[test]
    fn empty_submission_scores_zero() {
        let score = grade(&[]);
        assert_eq!(score.correct, 0);
        assert_eq!(score.percentage, 0);
    }

    #[test]
    fn feedback_tiers() {
        assert!(feedback(95).starts_with("Excellent"));
        assert!(feedback(70).starts_with("Great job"));
        assert!(feedback(50).starts_with("Good effort"));
        assert!(feedback(10).starts_with("Keep learning"));
    }
}
