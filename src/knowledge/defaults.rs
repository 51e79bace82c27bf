/// Built-in study-skills corpus: (title, category, content).
pub(crate) const DEFAULT_KNOWLEDGE: &[(&str, &str, &str)] = &[
    (
        "Study Techniques: Spaced Repetition",
        "Study Methods",
        "Spaced repetition is a learning technique that involves reviewing information at \
         increasing intervals. It builds on the spacing effect: information is recalled more \
         easily when learning sessions are spread out over time rather than concentrated in a \
         short period. A typical schedule is an initial learning session, a first review after \
         1 day, a second after 3 days, a third after 1 week, then reviews at ever longer \
         intervals. It works particularly well for facts, vocabulary and concepts that need \
         long-term retention.",
    ),
    (
        "Active Learning Strategies",
        "Study Methods",
        "Active learning means engaging with material through activities that require you to \
         analyze, synthesize and evaluate information. Unlike passive reading or listening, \
         active strategies include summarizing in your own words, asking questions about the \
         material, discussing concepts with peers, teaching others, drawing mind maps or concept \
         diagrams, solving problems, and self-testing with quizzes or flashcards. Research shows \
         active learning improves retention and understanding compared to passive methods.",
    ),
    (
        "Time Management: Pomodoro Technique",
        "Time Management",
        "The Pomodoro Technique alternates short focused work intervals with brief breaks. Pick \
         a task, set a timer for 25 minutes, work until the timer rings, take a 5-minute break, \
         and repeat. After four pomodoros take a longer 15 to 30 minute break. The technique \
         keeps focus high, prevents burnout, and makes large tasks manageable by splitting them \
         into timed segments.",
    ),
    (
        "Note-Taking: Cornell Method",
        "Note-Taking",
        "The Cornell note-taking system divides the page into three sections: a large note-taking \
         area on the right for notes written during class or reading, a narrow cue column on the \
         left for keywords, questions and main ideas added during review, and a summary section \
         at the bottom for a brief summary of the page. The layout encourages active engagement \
         and makes review efficient through built-in study cues.",
    ),
];
