//! Built-in question bank: the mandatory fallback when generation is
//! disabled or failing.
//!
//! Questions cycle within the enabled categories; a question is not reused
//! until the enabled pool is exhausted.

use std::collections::HashSet;

use rand::seq::SliceRandom;

use super::{Question, QuestionCategory};

pub fn categories() -> Vec<QuestionCategory> {
    [
        ("gk", "General Knowledge", "World facts, history, geography"),
        ("maths", "Mathematics", "Arithmetic, algebra, geometry"),
        ("science", "Science", "Physics, chemistry, biology"),
        ("tech", "Technology", "Computers, programming, gadgets"),
    ]
    .into_iter()
    .map(|(id, name, description)| QuestionCategory {
        id: id.into(),
        name: name.into(),
        description: description.into(),
    })
    .collect()
}

pub const DEFAULT_ENABLED_CATEGORIES: &[&str] = &["gk", "maths", "science"];

fn question(id: &str, category: &str, prompt: &str, options: [&str; 4], correct: &str) -> Question {
    Question {
        id: id.into(),
        category_id: category.into(),
        prompt: prompt.into(),
        options: options.iter().map(|o| o.to_string()).collect(),
        correct_answer: correct.into(),
    }
}

fn all_questions() -> Vec<Question> {
    vec![
        question(
            "gk1",
            "gk",
            "What is the capital of Australia?",
            ["Sydney", "Melbourne", "Canberra", "Perth"],
            "Canberra",
        ),
        question(
            "gk2",
            "gk",
            "Which planet is known as the Red Planet?",
            ["Venus", "Mars", "Jupiter", "Saturn"],
            "Mars",
        ),
        question(
            "gk3",
            "gk",
            "What is the largest ocean on Earth?",
            ["Atlantic", "Indian", "Arctic", "Pacific"],
            "Pacific",
        ),
        question(
            "gk4",
            "gk",
            "What is the smallest country in the world?",
            ["Monaco", "Vatican City", "San Marino", "Liechtenstein"],
            "Vatican City",
        ),
        question(
            "math1",
            "maths",
            "What is 15 \u{d7} 23?",
            ["345", "335", "355", "325"],
            "345",
        ),
        question(
            "math2",
            "maths",
            "What is the square root of 144?",
            ["12", "14", "16", "18"],
            "12",
        ),
        question(
            "math3",
            "maths",
            "What is 2^8?",
            ["256", "128", "512", "64"],
            "256",
        ),
        question(
            "sci1",
            "science",
            "What is the chemical symbol for gold?",
            ["Gd", "Au", "Ag", "Go"],
            "Au",
        ),
        question(
            "sci2",
            "science",
            "What gas makes up about 78% of Earth's atmosphere?",
            ["Oxygen", "Carbon Dioxide", "Nitrogen", "Hydrogen"],
            "Nitrogen",
        ),
        question(
            "sci3",
            "science",
            "What is the hardest natural substance?",
            ["Gold", "Iron", "Diamond", "Platinum"],
            "Diamond",
        ),
        question(
            "tech1",
            "tech",
            "What does 'HTTP' stand for?",
            [
                "HyperText Transfer Protocol",
                "High Tech Transfer Protocol",
                "Home Tool Transfer Protocol",
                "HyperText Translation Protocol",
            ],
            "HyperText Transfer Protocol",
        ),
        question(
            "tech2",
            "tech",
            "Which company developed Android?",
            ["Apple", "Microsoft", "Google", "Samsung"],
            "Google",
        ),
    ]
}

pub struct QuestionBank {
    questions: Vec<Question>,
    used: HashSet<String>,
}

impl QuestionBank {
    pub fn new() -> Self {
        Self {
            questions: all_questions(),
            used: HashSet::new(),
        }
    }

    /// Random unused question from the enabled categories. When the enabled
    /// pool is exhausted the used set is cleared and cycling starts over.
    pub fn pick(&mut self, enabled_categories: &[String]) -> Option<Question> {
        let enabled: Vec<&Question> = self
            .questions
            .iter()
            .filter(|q| enabled_categories.iter().any(|c| *c == q.category_id))
            .collect();
        if enabled.is_empty() {
            return None;
        }

        let mut unused: Vec<&&Question> =
            enabled.iter().filter(|q| !self.used.contains(&q.id)).collect();
        if unused.is_empty() {
            self.used.clear();
            unused = enabled.iter().collect();
        }

        let picked = (**unused.choose(&mut rand::thread_rng())?).clone();
        self.used.insert(picked.id.clone());
        Some(picked)
    }

    pub fn reset_used(&mut self) {
        self.used.clear();
    }
}

impl Default for QuestionBank {
    fn default() -> Self {
        Self::new()
    }
}
