mod completion_counters;
